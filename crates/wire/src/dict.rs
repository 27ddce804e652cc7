//! The per-connection name dictionary.
//!
//! Both peers keep an append-only list of the names they have seen. The
//! encoder replaces a repeated name with a two-byte index; the decoder
//! resolves indexes against its own list, which stays in lockstep because
//! insertion rules are identical on both sides. Entries are never evicted;
//! once the table is full both sides keep emitting literals.

/// Index values are 16 bits, so the table holds at most 65 536 names.
const CAPACITY: usize = 0x1_0000;

#[derive(Debug, Default)]
pub struct NameDict {
    names: Vec<String>,
}

impl NameDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all entries. Called when the dictionary is bound to a new
    /// stream.
    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Encoder side: returns the index of a known name, or records the name
    /// (while there is room) and returns None so the caller emits a literal.
    pub fn find_or_insert(&mut self, name: &str) -> Option<u16> {
        if let Some(index) = self.names.iter().position(|n| n == name) {
            return Some(index as u16);
        }
        if self.names.len() < CAPACITY {
            self.names.push(name.to_owned());
        }
        None
    }

    /// Decoder side: records a literal name exactly when the encoder would
    /// have.
    pub fn insert(&mut self, name: &str) {
        if self.names.len() < CAPACITY {
            self.names.push(name.to_owned());
        }
    }

    /// Decoder side: resolves a reference.
    pub fn get(&self, index: u16) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }
}
