use crate::{ServiceError, TextDocument};
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// `.txt` files directly inside `folder`, in natural order.
pub fn list_text_documents(folder: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| is_text_name(name))
        .collect();

    names.sort_by(|left, right| natural_cmp(left, right));
    names
}

/// Reads one text document by base name.
pub fn read_text_document(folder: &Path, name: &str) -> Result<TextDocument, ServiceError> {
    let base = Path::new(name.trim())
        .file_name()
        .map(|base| base.to_string_lossy().to_string())
        .unwrap_or_default();
    if base.is_empty() {
        return Err(ServiceError::InvalidInput("missing name".to_string()));
    }
    if !is_text_name(&base) {
        return Err(ServiceError::InvalidInput(format!("not a .txt file: {base}")));
    }

    let bytes = match fs::read(folder.join(&base)) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(ServiceError::NotFound(format!("no such document: {base}")))
        }
        Err(error) => return Err(error.into()),
    };

    Ok(TextDocument {
        content: String::from_utf8_lossy(&bytes).into_owned(),
        name: base,
    })
}

fn is_text_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk {
    Number(String),
    Text(String),
}

fn chunks(name: &str) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    for ch in name.chars() {
        let digit = ch.is_ascii_digit();
        if !current.is_empty() && digit != in_digits {
            out.push(finish(std::mem::take(&mut current), in_digits));
        }
        in_digits = digit;
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(finish(current, in_digits));
    }
    out
}

fn finish(run: String, digits: bool) -> Chunk {
    if digits {
        Chunk::Number(run)
    } else {
        Chunk::Text(run.to_lowercase())
    }
}

/// Digit runs compare by value, everything else case-insensitively.
fn natural_cmp(left: &str, right: &str) -> Ordering {
    let (a, b) = (chunks(left), chunks(right));
    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = match (x, y) {
            (Chunk::Number(x), Chunk::Number(y)) => {
                let (x, y) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
                x.len().cmp(&y.len()).then_with(|| x.cmp(y))
            }
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
            (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len()).then_with(|| left.cmp(right))
}
