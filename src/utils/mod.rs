//! Utility functions for parameter persistence

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use serde::{Serialize, Deserialize};
use crate::Result;

/// Save object to JSON file
pub fn save_json<T: Serialize + ?Sized, P: AsRef<Path>>(obj: &T, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer(&mut writer, obj)?;
    writer.flush()?;
    log::info!("saved parameters to {}", path.as_ref().display());
    Ok(())
}

/// Load object from JSON file
pub fn load_json<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let obj = serde_json::from_reader(reader)?;
    Ok(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::R2D2Error;
    use std::collections::BTreeMap;

    #[test]
    fn test_json_round_trip() {
        let mut obj = BTreeMap::new();
        obj.insert("window".to_string(), vec![1.0f32, 2.5]);
        let path = std::env::temp_dir().join("fast_r2d2_utils_test.json");

        save_json(&obj, &path).unwrap();
        let loaded: BTreeMap<String, Vec<f32>> = load_json(&path).unwrap();
        assert_eq!(obj, loaded);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<Vec<f32>> = load_json("/nonexistent/fast_r2d2.json");
        assert!(matches!(result, Err(R2D2Error::Io(_))));
    }
}
