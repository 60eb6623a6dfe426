//! Manifest for all the loadable assets a package ships.
//!
//! A manifest file starts with a fixed magic word and a little-endian format
//! version, followed by the bincode-serialized item table. Stores read the
//! manifest during package initialization and hand it to the
//! `PackageRegistry`, which performs all later location lookups against it.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use inlinable_string::InlinableString;
use uuid::Uuid;

use crate::errors::*;

pub const NAME: &str = ".MANIFEST";
pub const MAGIC: [u8; 4] = *b"CPMF";
pub const VERSION: u32 = 1;

/// A loadable asset in the package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestItem {
    /// The symbolic location callers use to request the asset. Unique
    /// within a package.
    pub location: String,
    /// Path of the backing file, relative to the package root.
    pub path: String,
    /// Tag of the loader that decodes the backing file.
    pub kind: InlinableString,
    pub uuid: Uuid,
}

/// Manifest for all the loadable assets a package ships.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub items: Vec<ManifestItem>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest { items: Vec::new() }
    }

    /// Loads a manifest from a readable stream, verifying magic and version.
    pub fn load_from(mut file: &mut dyn Read) -> Result<Manifest> {
        let mut magic = [0; 4];
        file.read_exact(&mut magic)?;

        if magic != MAGIC {
            return Err(Error::Malformed("Manifest magic mismatch.".into()));
        }

        let version = file.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(Error::Malformed(format!(
                "Unsupported manifest version {}.",
                version
            )));
        }

        Ok(bincode::deserialize_from(&mut file)?)
    }

    /// Writes the manifest out in the format `load_from` expects.
    pub fn save_to(&self, mut file: &mut dyn Write) -> Result<()> {
        file.write_all(&MAGIC)?;
        file.write_u32::<LittleEndian>(VERSION)?;
        bincode::serialize_into(&mut file, self)?;
        Ok(())
    }
}
