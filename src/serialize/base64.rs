//! Base64 snapshot mode: the binary buffer through the standard engine.

use crate::error::{Result, SimEcsError};
use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| SimEcsError::Corrupt(format!("base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes() -> Result<()> {
        let bytes = vec![0u8, 2, 255, 128, 7];
        assert_eq!(decode(&encode(&bytes))?, bytes);
        Ok(())
    }
}
