use std::fs::{create_dir_all, read, read_to_string, File};
use std::path::Path;

use crate::defs::{IntoResult, Result};

fn display<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_str().unwrap_or("<non-utf8 path>").to_string()
}

pub fn open_file<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::open(path).res(|| format!("failed to open file '{}'", display(path)))
}

pub fn create_file<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::create(path)
        .res(|| format!("failed to create file '{}'", display(path)))
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    read(path).res(|| format!("failed to read file '{}'", display(path)))
}

pub fn read_file_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    read_to_string(path)
        .res(|| format!("failed to read file '{}'", display(path)))
}

pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    create_dir_all(path)
        .res(|| format!("failed to create directory '{}'", display(path)))
}
