use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

use crate::misc::{Point3, Vector2, Vector3};

const MAX_NUM_FACE_VERTICES: usize = 10;

/// Triangle mesh with a per-face UV layer. Face UV corners index into
/// `uv_coords` through `uv_idxs`, one entry per face; faces without
/// texture coordinates carry `None`.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Point3>,
    pub normals: Vec<Vector3>,
    pub faces: Vec<[usize; 3]>,
    pub uv_coords: Vec<Vector2>,
    pub uv_idxs: Vec<Option<[usize; 3]>>,
}

impl Mesh {
    pub fn face_uvs(&self, face_idx: usize) -> Option<[Vector2; 3]> {
        self.uv_idxs[face_idx].map(|[t0, t1, t2]| {
            [self.uv_coords[t0], self.uv_coords[t1], self.uv_coords[t2]]
        })
    }

    /// Total unsigned area of the UV chart. A mesh whose chart collapses
    /// to (near) zero area cannot receive a texture.
    pub fn uv_area(&self) -> f64 {
        (0..self.faces.len())
            .filter_map(|f| self.face_uvs(f))
            .map(|[a, b, c]| {
                let (u, v) = (b - a, c - a);
                (u[0] * v[1] - u[1] * v[0]).abs() / 2.0
            })
            .sum()
    }

    pub fn has_degenerate_uvs(&self) -> bool {
        self.uv_idxs.iter().all(|uvs| uvs.is_none())
            || self.uv_area() < 1e-12
    }

    pub fn face_normal(&self, face_idx: usize) -> Vector3 {
        let [v0, v1, v2] = self.faces[face_idx];
        let a = self.vertices[v1] - self.vertices[v0];
        let b = self.vertices[v2] - self.vertices[v0];
        let n = a.cross(&b);
        if n.norm() > 0.0 {
            n.normalize()
        } else {
            Vector3::z()
        }
    }
}

pub fn import_obj<P: AsRef<Path>>(name: &str, path: P) -> Result<Mesh> {
    let file = fs::open_file(path)?;
    read_obj(name, file)
}

pub fn read_obj<R: Read>(name: &str, reader: R) -> Result<Mesh> {
    let mut state = ImportState {
        mesh: Mesh {
            name: name.to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    for line_res in BufReader::new(reader).lines() {
        let line = line_res?;
        state.line += 1;

        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        if !parts.is_empty() {
            match parts[0] {
                "f" => import_f(&mut state, &parts)?,
                "v" => import_v(&mut state, &parts)?,
                "vn" => import_vn(&mut state, &parts)?,
                "vt" => import_vt(&mut state, &parts)?,
                _ => (),
            }
        }
    }

    finalize_normals(&mut state);
    Ok(state.mesh)
}

#[derive(Default)]
struct ImportState {
    line: usize,
    mesh: Mesh,
    obj_normals: Vec<Vector3>,
    // Normal index per vertex as given by f-statements, 0 when unset.
    vertex_normal_idxs: Vec<usize>,
}

fn parse_floats(
    state: &ImportState,
    parts: &[&str],
    stmt: &str,
    n: usize,
) -> Result<Vec<f64>> {
    if parts.len() < n + 1 {
        let desc = format!(
            "malformed {}-statement at line {}",
            stmt, state.line
        );
        return Err(Error::new(MalformedData, desc));
    }
    let mut vals = Vec::with_capacity(n);
    for part in &parts[1..=n] {
        let val = part.parse::<f64>().map_err(|_| {
            let desc = format!(
                "malformed number in {}-statement at line {}",
                stmt, state.line
            );
            Error::new(MalformedData, desc)
        })?;
        vals.push(val);
    }
    Ok(vals)
}

fn import_v(state: &mut ImportState, parts: &[&str]) -> Result<()> {
    let v = parse_floats(state, parts, "v", 3)?;
    state.mesh.vertices.push(Point3::new(v[0], v[1], v[2]));
    state.vertex_normal_idxs.push(0);
    Ok(())
}

fn import_vn(state: &mut ImportState, parts: &[&str]) -> Result<()> {
    let v = parse_floats(state, parts, "vn", 3)?;
    state.obj_normals.push(Vector3::new(v[0], v[1], v[2]));
    Ok(())
}

fn import_vt(state: &mut ImportState, parts: &[&str]) -> Result<()> {
    let v = parse_floats(state, parts, "vt", 2)?;
    state.mesh.uv_coords.push(Vector2::new(v[0], v[1]));
    Ok(())
}

fn import_f(state: &mut ImportState, parts: &[&str]) -> Result<()> {
    let num_vertices_err_res = |kind, prop| {
        let msg = "number of vertices in f-statement at line";
        Err(Error::new(kind, format!("{} {} {}", prop, msg, state.line)))
    };
    if parts.len() < 4 {
        return num_vertices_err_res(MalformedData, "bad");
    } else if parts.len() > MAX_NUM_FACE_VERTICES {
        return num_vertices_err_res(UnsupportedFeature, "unsupported");
    }

    let mut face_vertices = [(0, 0, 0); MAX_NUM_FACE_VERTICES];

    for (i, part) in parts[1..].iter().enumerate() {
        let mut iter = part.split('/');
        let vertex = parse_f_component(state.line, &mut iter, i + 1, false)?;
        let texture = parse_f_component(state.line, &mut iter, i + 1, true)?;
        let normal = parse_f_component(state.line, &mut iter, i + 1, true)?;
        face_vertices[i] = (vertex, texture, normal);
    }

    // Triangulate as a fan around the first vertex.
    let len = parts.len() - 1;
    for i in 1..len - 1 {
        let corners =
            [face_vertices[0], face_vertices[i], face_vertices[i + 1]];
        let mut face = [0usize; 3];
        let mut uvs = [0usize; 3];

        for (k, &(v, t, n)) in corners.iter().enumerate() {
            let vertex_idx = check_idx(state, v, state.mesh.vertices.len())?;
            face[k] = vertex_idx;

            if t != 0 {
                uvs[k] = check_idx(state, t, state.mesh.uv_coords.len())?;
            }
            if n != 0 {
                let normal_idx =
                    check_idx(state, n, state.obj_normals.len())?;
                state.vertex_normal_idxs[vertex_idx] = normal_idx + 1;
            }
        }

        state.mesh.faces.push(face);
        // Kept parallel to `faces` even for UV-less faces.
        if corners.iter().all(|&(_, t, _)| t != 0) {
            state.mesh.uv_idxs.push(Some(uvs));
        } else {
            state.mesh.uv_idxs.push(None);
        }
    }

    Ok(())
}

fn check_idx(state: &ImportState, num: u32, len: usize) -> Result<usize> {
    let idx = num as usize - 1;
    if idx < len {
        Ok(idx)
    } else {
        let desc = format!(
            "out-of-range index in f-statement at line {}",
            state.line
        );
        Err(Error::new(MalformedData, desc))
    }
}

fn parse_f_component(
    line: usize,
    iter: &mut std::str::Split<char>,
    vnum: usize,
    optional: bool,
) -> Result<u32> {
    let component: &str = iter.next().unwrap_or_default();
    if component.is_empty() && optional {
        return Ok(0);
    }

    let num = component.parse::<u32>().unwrap_or_default();
    if num != 0 {
        Ok(num)
    } else {
        let desc = format!(
            "malformed vertex {} in f-statement at line {}",
            vnum, line
        );
        Err(Error::new(MalformedData, desc))
    }
}

fn finalize_normals(state: &mut ImportState) {
    let mesh = &mut state.mesh;
    mesh.normals = vec![Vector3::zeros(); mesh.vertices.len()];

    // Start from area-weighted face normals, then let explicit
    // vn-statements override where present.
    for face_idx in 0..mesh.faces.len() {
        let [v0, v1, v2] = mesh.faces[face_idx];
        let a = mesh.vertices[v1] - mesh.vertices[v0];
        let b = mesh.vertices[v2] - mesh.vertices[v0];
        let n = a.cross(&b);
        mesh.normals[v0] += n;
        mesh.normals[v1] += n;
        mesh.normals[v2] += n;
    }

    for (vertex_idx, &normal_idx) in
        state.vertex_normal_idxs.iter().enumerate()
    {
        if normal_idx != 0 {
            mesh.normals[vertex_idx] = state.obj_normals[normal_idx - 1];
        }
    }

    for normal in &mut mesh.normals {
        if normal.norm() > 0.0 {
            normal.normalize_mut();
        } else {
            *normal = Vector3::z();
        }
    }
}
