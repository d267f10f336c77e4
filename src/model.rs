//! On-disk classifier model format.
//!
//! The Python original pickles a whole `sklearn` object graph; that format
//! is source-language-specific and is not reused (`spec.md` §9). Instead we
//! define an explicit, portable layout: a header (version, k, weighting,
//! feature names in order, enabled client labels in order, thresholds, the
//! graffiti-only set) followed by a dense `N x F` matrix of little-endian
//! `float64` and an `N`-entry `uint16` label vector.

use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::ModelError;
use crate::types::Client;

const MAGIC: &[u8; 8] = b"CPRNTMD1";
const FORMAT_VERSION: u16 = 1;

/// Weighting scheme used by the k-NN engine. Only `Distance` is specified,
/// but the byte is reserved so the format can grow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Weighting {
    Distance,
}

impl Weighting {
    fn to_byte(self) -> u8 {
        match self {
            Weighting::Distance => 0,
        }
    }
    fn from_byte(b: u8) -> Result<Self, ModelError> {
        match b {
            0 => Ok(Weighting::Distance),
            other => Err(ModelError::Malformed(format!("unknown weighting byte {other}"))),
        }
    }
}

/// A built, immutable classifier model: training matrix, feature order,
/// enabled clients, k-NN constants, and hedging thresholds.
#[derive(Clone, Debug)]
pub struct ClassifierModel {
    pub feature_names: Vec<String>,
    /// Enabled clients, in closed-set order. A client absent here had zero
    /// training samples at build time.
    pub enabled_clients: Vec<Client>,
    /// Row-major `N x F` training matrix.
    pub x: Vec<Vec<f64>>,
    /// Label index into `enabled_clients`, one per training row.
    pub y: Vec<u16>,
    pub k: usize,
    pub weighting: Weighting,
    pub confidence: f64,
    pub min_guess: f64,
    /// Clients with too few reward samples: only the graffiti path may
    /// emit a positive label for these (`spec.md` §4.E step 2).
    pub graffiti_only: Vec<Client>,
}

impl ClassifierModel {
    pub fn enabled_index(&self, client: Client) -> Option<usize> {
        self.enabled_clients.iter().position(|&c| c == client)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let mut f = std::fs::File::create(path)?;
        self.write_to(&mut f)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ModelError> {
        w.write_all(MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&(self.k as u16).to_le_bytes())?;
        w.write_all(&[self.weighting.to_byte()])?;
        w.write_all(&self.confidence.to_le_bytes())?;
        w.write_all(&self.min_guess.to_le_bytes())?;

        w.write_all(&(self.feature_names.len() as u16).to_le_bytes())?;
        for name in &self.feature_names {
            let bytes = name.as_bytes();
            w.write_all(&(bytes.len() as u16).to_le_bytes())?;
            w.write_all(bytes)?;
        }

        w.write_all(&(self.enabled_clients.len() as u16).to_le_bytes())?;
        for c in &self.enabled_clients {
            w.write_all(&[c.closed_set_index() as u8])?;
        }

        w.write_all(&(self.graffiti_only.len() as u16).to_le_bytes())?;
        for c in &self.graffiti_only {
            w.write_all(&[c.closed_set_index() as u8])?;
        }

        let n = self.x.len() as u32;
        let feat_count = self.feature_names.len() as u32;
        w.write_all(&n.to_le_bytes())?;
        w.write_all(&feat_count.to_le_bytes())?;

        for row in &self.x {
            if row.len() as u32 != feat_count {
                return Err(ModelError::Malformed("ragged training matrix".to_string()));
            }
            for v in row {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        for label in &self.y {
            w.write_all(&label.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let mut f = std::fs::File::open(path)?;
        Self::read_from(&mut f)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ModelError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ModelError::Malformed("bad model file magic".to_string()));
        }
        let version = read_u16(r)?;
        if version != FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }
        let k = read_u16(r)? as usize;
        let weighting = Weighting::from_byte(read_u8(r)?)?;
        let confidence = read_f64(r)?;
        let min_guess = read_f64(r)?;

        let num_features = read_u16(r)? as usize;
        let mut feature_names = Vec::with_capacity(num_features);
        for _ in 0..num_features {
            let len = read_u16(r)? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            feature_names.push(
                String::from_utf8(buf).map_err(|e| ModelError::Malformed(e.to_string()))?,
            );
        }

        let num_clients = read_u16(r)? as usize;
        let mut enabled_clients = Vec::with_capacity(num_clients);
        for _ in 0..num_clients {
            enabled_clients.push(client_from_index(read_u8(r)?)?);
        }

        let num_graffiti_only = read_u16(r)? as usize;
        let mut graffiti_only = Vec::with_capacity(num_graffiti_only);
        for _ in 0..num_graffiti_only {
            graffiti_only.push(client_from_index(read_u8(r)?)?);
        }

        let n = read_u32(r)? as usize;
        let feat_count = read_u32(r)? as usize;
        if feat_count != num_features {
            return Err(ModelError::Malformed(
                "feature count mismatch between header and matrix".to_string(),
            ));
        }

        let mut x = Vec::with_capacity(n);
        for _ in 0..n {
            let mut row = Vec::with_capacity(feat_count);
            for _ in 0..feat_count {
                row.push(read_f64(r)?);
            }
            x.push(row);
        }
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            y.push(read_u16(r)?);
        }

        Ok(Self {
            feature_names,
            enabled_clients,
            x,
            y,
            k,
            weighting,
            confidence,
            min_guess,
            graffiti_only,
        })
    }
}

fn client_from_index(idx: u8) -> Result<Client, ModelError> {
    Client::ALL
        .get(idx as usize)
        .copied()
        .ok_or_else(|| ModelError::Malformed(format!("bad client index {idx}")))
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}
fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}
fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
fn read_f64<R: Read>(r: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> ClassifierModel {
        ClassifierModel {
            feature_names: vec!["percent_redundant_boost".to_string(), "difflib_rewards".to_string()],
            enabled_clients: vec![Client::Lighthouse, Client::Prysm, Client::Teku],
            x: vec![vec![0.1, 0.9], vec![0.5, 0.5], vec![0.9, 0.1]],
            y: vec![0, 1, 2],
            k: 9,
            weighting: Weighting::Distance,
            confidence: 0.95,
            min_guess: 0.20,
            graffiti_only: vec![Client::Lodestar],
        }
    }

    #[test]
    fn roundtrips_through_bytes() {
        let model = sample_model();
        let mut buf = Vec::new();
        model.write_to(&mut buf).unwrap();
        let loaded = ClassifierModel::read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.feature_names, model.feature_names);
        assert_eq!(loaded.enabled_clients, model.enabled_clients);
        assert_eq!(loaded.x, model.x);
        assert_eq!(loaded.y, model.y);
        assert_eq!(loaded.k, model.k);
        assert_eq!(loaded.confidence, model.confidence);
        assert_eq!(loaded.graffiti_only, model.graffiti_only);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 32];
        assert!(ClassifierModel::read_from(&mut buf.as_slice()).is_err());
    }
}
