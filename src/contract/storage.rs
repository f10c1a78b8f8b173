//! Contract persistence.
//!
//! One pretty-printed JSON object per file. The parent directory is created
//! with mode 0755 and the artifact is written with mode 0600.

use std::fs::{DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;

use crate::contract::Contract;
use crate::error::{GatewayError, Result};

pub fn save(path: &Path, contract: &Contract) -> Result<()> {
    write_artifact(path, contract).map_err(|source| GatewayError::Contract {
        path: path.display().to_string(),
        source: Box::new(source),
    })
}

pub fn load(path: &Path) -> Result<Contract> {
    read_artifact(path).map_err(|source| GatewayError::Contract {
        path: path.display().to_string(),
        source: Box::new(source),
    })
}

fn write_artifact(path: &Path, contract: &Contract) -> Result<()> {
    let data = serde_json::to_vec_pretty(contract)?;

    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        DirBuilder::new().recursive(true).mode(0o755).create(dir)?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(&data)?;
    Ok(())
}

fn read_artifact(path: &Path) -> Result<Contract> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}
