use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::defs::{Error, ErrorKind, Result};

/// Run-level cancellation flag, shared between the driver of a long
/// operation and whoever may abort it. Checked at suspension points.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::new(
                ErrorKind::Cancelled,
                "operation cancelled".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.ensure_active().is_ok());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        let err = token.ensure_active().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
