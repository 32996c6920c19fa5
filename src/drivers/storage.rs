//! Persistent configuration storage trait

use crate::error::Result;

/// Fixed-size opaque blob persistence for the tuning configuration.
///
/// The blob content is owned by [`crate::config::TuningConfig`]; the store
/// only moves bytes. An EEPROM, a file, a flash page or a RAM buffer all
/// qualify. The first two bytes of the blob are a signature that the config
/// layer uses to detect a missing or corrupt store.
pub trait ConfigStorage: Send {
    /// Fill `blob` from the store.
    fn read_into(&mut self, blob: &mut [u8]) -> Result<()>;

    /// Write `blob` to the store.
    fn write(&mut self, blob: &[u8]) -> Result<()>;
}
