//! Conversions between engine-level and wire-level values

use driftdb_core::vclock::Version;
use driftdb_core::{Result, VersionedValue};
use driftdb_net::VersionedValueMsg;

pub fn to_msg(value: VersionedValue) -> VersionedValueMsg {
    VersionedValueMsg {
        data: value.data,
        version: value.version.encode(),
        tombstone: value.tombstone,
    }
}

pub fn to_msgs(values: Vec<VersionedValue>) -> Vec<VersionedValueMsg> {
    values.into_iter().map(to_msg).collect()
}

pub fn from_msg(msg: VersionedValueMsg) -> Result<VersionedValue> {
    Ok(VersionedValue {
        data: msg.data,
        version: Version::decode(&msg.version)?,
        tombstone: msg.tombstone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut version = Version::new();
        version.increment(3);

        let value = VersionedValue::new(b"payload".to_vec(), version);
        let back = from_msg(to_msg(value.clone())).unwrap();

        assert_eq!(back, value);
    }

    #[test]
    fn test_bad_version_is_rejected() {
        let msg = VersionedValueMsg {
            data: Vec::new(),
            version: "broken".to_string(),
            tombstone: false,
        };

        assert!(from_msg(msg).is_err());
    }
}
