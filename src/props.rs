use std::collections::{BTreeMap, BTreeSet};

/// Prefixes of the property namespaces that never appear in a dump. The
/// classification is a plain table lookup on the name prefix; anything that
/// matches neither prefix is a regular versioned property.
const ENTRY_PREFIX: &str = "svn:entry:";
const CUSTOM_PREFIX: &str = "svn:wc:";

/// Is this a regular versioned property, as opposed to entry metadata or a
/// client-internal property? Only regular properties are retained; note that
/// plain `svn:` names (`svn:log`, `svn:mime-type`, ...) are regular.
pub fn is_regular_prop(name: &str) -> bool {
    !name.starts_with(ENTRY_PREFIX) && !name.starts_with(CUSTOM_PREFIX)
}

/// Accumulates the set and deleted properties of the node currently being
/// described, and serializes them into the textual property block.
///
/// Sorted maps keep the serialized block deterministic for a given input;
/// the format itself does not care about entry order.
#[derive(Debug, Default)]
pub struct PropBuffer {
    props: BTreeMap<String, Vec<u8>>,
    del_props: BTreeSet<String>,
}

impl PropBuffer {
    pub fn new() -> PropBuffer {
        PropBuffer::default()
    }

    /// Buffers a property set. Non-regular names are dropped without error.
    pub fn set(&mut self, name: &str, value: &[u8]) {
        if !is_regular_prop(name) {
            return;
        }
        self.del_props.remove(name);
        self.props.insert(name.to_string(), value.to_vec());
    }

    /// Buffers a property deletion. Non-regular names are dropped without error.
    pub fn delete(&mut self, name: &str) {
        if !is_regular_prop(name) {
            return;
        }
        self.props.remove(name);
        self.del_props.insert(name.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.del_props.is_empty()
    }

    pub fn clear(&mut self) {
        self.props.clear();
        self.del_props.clear();
    }

    /// One `K/V` entry per set key, then one `D` entry per deleted key, then
    /// the `PROPS-END` sentinel. Lengths are byte lengths of the following
    /// field. The returned block is what node headers count as the property
    /// content.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.props {
            out.extend_from_slice(format!("K {}\n", name.len()).as_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(b'\n');
            out.extend_from_slice(format!("V {}\n", value.len()).as_bytes());
            out.extend_from_slice(value);
            out.push(b'\n');
        }
        for name in &self.del_props {
            out.extend_from_slice(format!("D {}\n", name.len()).as_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(b"PROPS-END\n");
        out
    }
}
