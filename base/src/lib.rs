pub mod defs;
pub mod util;

#[macro_export]
macro_rules! assert_eq_f64 {
    ($a:expr, $b:expr) => {
        $crate::assert_eq_f64!($a, $b, 1e-9)
    };
    ($a:expr, $b:expr, $tol:expr) => {
        let (a, b) = ($a, $b);
        assert!(
            (a - b).abs() <= $tol,
            "assertion failed: `{} == {}` (tolerance {})",
            a,
            b,
            $tol
        )
    };
}
