//! Maps codec identifier strings (as persisted in collection/index
//! metadata) to [Packer] variants.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::codec::Packer;

lazy_static! {
    static ref REGISTRY: HashMap<&'static str, Packer> = {
        let mut m = HashMap::new();
        for p in [
            Packer::Uint32,
            Packer::Uint16,
            Packer::Uint8,
            Packer::Int32,
            Packer::Int16,
            Packer::Float,
            Packer::Str,
            Packer::Dict,
            Packer::Obj,
            Packer::Revision,
        ] {
            m.insert(p.identifier(), p);
        }
        m
    };
}

/// The process-wide codec-identifier registry.
pub fn registry() -> &'static HashMap<&'static str, Packer> {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_all_packers() {
        let r = registry();
        assert_eq!(r.len(), 10);
        assert_eq!(r.get("uint32"), Some(&Packer::Uint32));
        assert_eq!(r.get("string"), Some(&Packer::Str));
        assert_eq!(r.get("revision"), Some(&Packer::Revision));
    }
}
