use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThermalError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("unexpected value in {path}: '{raw}'")]
    Parse { path: String, raw: String },
}

/// Reads a kernel thermal zone value (millidegrees Celsius) and converts it
/// to degrees.
pub fn read_celsius(path: &Path) -> Result<f64, ThermalError> {
    let raw = fs::read_to_string(path).map_err(|source| ThermalError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let trimmed = raw.trim();
    let millidegrees: f64 = trimmed.parse().map_err(|_| ThermalError::Parse {
        path: path.display().to_string(),
        raw: trimmed.to_string(),
    })?;
    if !millidegrees.is_finite() {
        return Err(ThermalError::Parse {
            path: path.display().to_string(),
            raw: trimmed.to_string(),
        });
    }
    Ok(millidegrees / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millidegrees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        fs::write(&path, "48312\n").unwrap();
        let t = read_celsius(&path).unwrap();
        assert!((t - 48.312).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_celsius(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ThermalError::Read { .. }));
    }

    #[test]
    fn garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        fs::write(&path, "n/a").unwrap();
        assert!(matches!(
            read_celsius(&path).unwrap_err(),
            ThermalError::Parse { .. }
        ));

        fs::write(&path, "NaN").unwrap();
        assert!(read_celsius(&path).is_err());
    }
}
