//! Loading mote definitions from disk.
//!
//! Each mote lives in its own TOML file:
//!
//! ```toml
//! [general]
//! address = 7
//! location = "Kitchen"
//!
//! [[registers]]
//! id = 11
//! length = 3
//!
//! [[values]]
//! name = "Temperature"
//! register = 11
//! position = 0
//! type = "uint16"
//! unit = "C"
//! offset = 50
//! scale = 10
//! ```

use crate::mote::{Mote, Register};
use crate::value::ValueDefinition;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors returned while reading mote definitions.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse mote config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("value '{value}' has a scale of zero")]
    ZeroScale { value: String },
    #[error("value '{value}' does not fit in register {register} ({length} bytes)")]
    ValueOutOfRegister {
        value: String,
        register: u8,
        length: u8,
    },
}

#[derive(Debug, Deserialize)]
struct General {
    address: u8,
    location: String,
}

#[derive(Debug, Deserialize)]
struct MoteFile {
    general: General,
    #[serde(default)]
    registers: Vec<Register>,
    #[serde(default)]
    values: Vec<ValueDefinition>,
}

impl Mote {
    /// Parse and validate a mote definition.
    pub fn from_toml(src: &str) -> Result<Self, SchemaError> {
        let file: MoteFile = toml::from_str(src)?;
        let mote = Mote {
            address: file.general.address,
            location: file.general.location,
            registers: file.registers,
            values: file.values,
        };
        validate(&mote)?;
        Ok(mote)
    }
}

fn validate(mote: &Mote) -> Result<(), SchemaError> {
    for value in &mote.values {
        if value.scale == 0 {
            return Err(SchemaError::ZeroScale {
                value: value.name.clone(),
            });
        }

        let (Some(register), Some(width)) =
            (mote.register(value.register), value.value_type.width())
        else {
            continue;
        };
        if usize::from(value.position) + width > usize::from(register.length) {
            return Err(SchemaError::ValueOutOfRegister {
                value: value.name.clone(),
                register: register.id,
                length: register.length,
            });
        }
    }
    Ok(())
}

/// Read a single mote definition file.
pub fn load_mote(path: &Path) -> Result<Mote, SchemaError> {
    let src = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Mote::from_toml(&src)
}

/// Read every mote definition in `dir`, in file name order.
pub fn load_motes(dir: &Path) -> Result<Vec<Mote>, SchemaError> {
    let io_err = |source| SchemaError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut motes = Vec::with_capacity(files.len());
    for file in files {
        info!("Reading from {}", file.display());
        let mote = load_mote(&file)?;
        info!("Mote {}: Location {}", mote.address, mote.location);
        for value in &mote.values {
            debug!("    Value: {}, type: {}", value.name, value.value_type);
        }
        motes.push(mote);
    }
    Ok(motes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SAMPLE_MOTE_TOML, sample_mote};
    use std::io::Write;

    #[test]
    fn test_from_toml() {
        let mote = Mote::from_toml(SAMPLE_MOTE_TOML).unwrap();
        assert_eq!(mote, sample_mote());
    }

    #[test]
    fn test_from_toml_without_registers() {
        let mote = Mote::from_toml(
            r#"
            [general]
            address = 3
            location = "Garage"
            "#,
        )
        .unwrap();
        assert_eq!(mote.address, 3);
        assert_eq!(mote.location, "Garage");
        assert!(mote.registers.is_empty());
        assert!(mote.values.is_empty());
    }

    #[test]
    fn test_from_toml_rejects_zero_scale() {
        let err = Mote::from_toml(
            r#"
            [general]
            address = 3
            location = "Garage"

            [[values]]
            name = "Door"
            register = 11
            position = 0
            type = "uint8"
            scale = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ZeroScale { ref value } if value == "Door"));
    }

    #[test]
    fn test_from_toml_rejects_value_past_register() {
        let err = Mote::from_toml(
            r#"
            [general]
            address = 3
            location = "Garage"

            [[registers]]
            id = 11
            length = 2

            [[values]]
            name = "Counter"
            register = 11
            position = 0
            type = "uint32"
            "#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "value 'Counter' does not fit in register 11 (2 bytes)"
        );
    }

    #[test]
    fn test_from_toml_rejects_missing_general() {
        let err = Mote::from_toml("[[values]]\nname = \"x\"").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn test_load_motes_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut second = fs::File::create(dir.path().join("b_garage.toml")).unwrap();
        writeln!(second, "[general]\naddress = 3\nlocation = \"Garage\"").unwrap();
        fs::write(dir.path().join("a_kitchen.toml"), SAMPLE_MOTE_TOML).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let motes = load_motes(dir.path()).unwrap();
        let locations: Vec<&str> = motes.iter().map(|m| m.location.as_str()).collect();
        assert_eq!(locations, vec!["Kitchen", "Garage"]);
    }

    #[test]
    fn test_load_motes_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            load_motes(&missing),
            Err(SchemaError::Io { .. })
        ));
    }
}
