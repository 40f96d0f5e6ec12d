use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};

use camino::Utf8Path;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::KiraError;

/// Writes `content` to a temp file beside `path` and renames it into place.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = path
        .parent()
        .ok_or_else(|| KiraError::Filesystem(format!("invalid destination path: {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-ce")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), KiraError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| KiraError::Store(err.to_string()))?;
    write_atomic(path, &content)
}

pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, KiraError> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|err| KiraError::Store(format!("{path}: {err}")))
}

/// Appends one JSON document per line. Callers serialise appends to a file.
pub fn append_jsonl<T: Serialize>(path: &Utf8Path, items: &[T]) -> Result<(), KiraError> {
    if items.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    let mut buffer = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buffer, item).map_err(|err| KiraError::Store(err.to_string()))?;
        buffer.push(b'\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
    file.write_all(&buffer)
        .map_err(|err| KiraError::Filesystem(format!("append {path}: {err}")))?;
    Ok(())
}

/// Reads a JSON-lines file; a missing file is empty. Blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Utf8Path) -> Result<Vec<T>, KiraError> {
    if !path.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
    let mut items = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .map_err(|err| KiraError::Store(format!("{path}:{}: {err}", idx + 1)))?;
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn jsonl_appends_accumulate() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("log/items.jsonl")).unwrap();
        append_jsonl(&path, &[1u32, 2]).unwrap();
        append_jsonl(&path, &[3u32]).unwrap();
        append_jsonl::<u32>(&path, &[]).unwrap();
        let items: Vec<u32> = read_jsonl(&path).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn missing_json_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("absent.json")).unwrap();
        assert!(read_json::<u32>(&path).unwrap().is_none());
    }
}
