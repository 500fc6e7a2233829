//! Flash signature catalog: the compiled-in table plus user-supplied entries.

use std::fmt;

/// Real signature slots; one extra slot is reserved for the terminator.
pub const MAX_TYPES: usize = 1023;

/// Description text beyond this many bytes is silently truncated.
pub const MAX_DESCRIPTION: usize = 63;

/// One known flash-chip signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub manufacturer_id: u8,
    pub device_id: u8,
    pub description: String,
    pub size_bytes: u32,
}

impl Signature {
    pub fn new(manufacturer_id: u8, device_id: u8, description: &str, size_bytes: u32) -> Self {
        Signature {
            manufacturer_id,
            device_id,
            description: truncate_description(description),
            size_bytes,
        }
    }

    /// The all-zero entry that terminates the catalog table.
    pub fn terminator() -> Self {
        Signature {
            manufacturer_id: 0,
            device_id: 0,
            description: String::new(),
            size_bytes: 0,
        }
    }

    pub fn is_terminator(&self) -> bool {
        self.manufacturer_id == 0 && self.device_id == 0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:02X}, 0x{:02X}, '{}', {:08X}",
            self.manufacturer_id, self.device_id, self.description, self.size_bytes
        )
    }
}

fn truncate_description(text: &str) -> String {
    if text.len() <= MAX_DESCRIPTION {
        return text.to_string();
    }
    let mut end = MAX_DESCRIPTION;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Ordered, bounded collection of known signatures.
///
/// The backing table is always terminated by the all-zero entry; real
/// entries sit in front of it, seed entries first, configuration-file
/// entries after in file order. `(manufacturer_id, device_id)` is the dedup
/// key and the first entry seen for a pair wins.
pub struct Catalog {
    /// The last element is always the terminator.
    entries: Vec<Signature>,
    full_notice: bool,
}

impl Catalog {
    /// Catalog seeded from the compiled-in table.
    pub fn builtin() -> Self {
        Self::from_seed(BUILTIN_TYPES)
    }

    /// Catalog seeded from an arbitrary table.
    pub fn from_seed(seed: &[(u8, u8, &str, u32)]) -> Self {
        let mut catalog = Catalog {
            entries: vec![Signature::terminator()],
            full_notice: false,
        };
        for &(manufacturer_id, device_id, description, size_bytes) in seed {
            catalog.push(Signature::new(manufacturer_id, device_id, description, size_bytes));
        }
        catalog
    }

    /// Number of real entries; the terminator is not counted.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Real slots still available.
    pub fn remaining(&self) -> usize {
        MAX_TYPES - self.len()
    }

    pub fn find(&self, manufacturer_id: u8, device_id: u8) -> Option<&Signature> {
        self.iter()
            .find(|s| s.manufacturer_id == manufacturer_id && s.device_id == device_id)
    }

    pub fn contains(&self, manufacturer_id: u8, device_id: u8) -> bool {
        self.find(manufacturer_id, device_id).is_some()
    }

    /// Real entries, in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.entries[..self.len()].iter()
    }

    /// The terminator-ended table, as handed to descriptor resolution.
    pub fn as_table(&self) -> &[Signature] {
        &self.entries
    }

    /// Insert a signature unless it duplicates an existing pair, carries a
    /// zero id, or the catalog is full. Returns whether it was added.
    ///
    /// A zero manufacturer or device id would read as the terminator entry,
    /// so such candidates are never representable as real signatures.
    pub fn push(&mut self, signature: Signature) -> bool {
        if signature.manufacturer_id == 0 || signature.device_id == 0 {
            log::debug!("  {} - zero id, rejected", signature);
            return false;
        }
        if self.contains(signature.manufacturer_id, signature.device_id) {
            log::debug!("  {} - already known", signature);
            return false;
        }
        match self.remaining() {
            0 => false,
            remaining => {
                if remaining == 1 && !self.full_notice {
                    self.full_notice = true;
                    log::warn!("only {} flash types supported, rest ignored", MAX_TYPES);
                }
                let terminator = self.entries.len() - 1;
                self.entries.insert(terminator, signature);
                true
            }
        }
    }
}

/// Compiled-in signature seed: parallel NOR parts commonly found on
/// memory-mapped firmware buses. Configuration-file entries are appended
/// after these.
pub const BUILTIN_TYPES: &[(u8, u8, &str, u32)] = &[
    // AMD
    (0x01, 0xAD, "AMD Am29F016D", 0x00200000),
    (0x01, 0xD5, "AMD Am29F080B", 0x00100000),
    (0x01, 0xA4, "AMD Am29F040B", 0x00080000),
    // Fujitsu
    (0x04, 0xAD, "Fujitsu MBM29F016A", 0x00200000),
    (0x04, 0xD5, "Fujitsu MBM29F080A", 0x00100000),
    // Atmel
    (0x1F, 0xDA, "Atmel AT29C020", 0x00040000),
    (0x1F, 0x5D, "Atmel AT29C512", 0x00010000),
    // ST
    (0x20, 0xE2, "ST M29F040B", 0x00080000),
    (0x20, 0xF1, "ST M29F080A", 0x00100000),
    // AMIC
    (0x37, 0x86, "AMIC A29002T", 0x00040000),
    // Intel
    (0x89, 0xA6, "Intel 28F008S5", 0x00100000),
    (0x89, 0xAD, "Intel 82802AB", 0x00080000),
    // Toshiba
    (0x98, 0xEA, "Toshiba TC58FVB004", 0x00080000),
    // Hyundai
    (0xAD, 0xD5, "Hyundai HY29F080", 0x00100000),
    (0xAD, 0xAD, "Hyundai HY29F016", 0x00200000),
    // Sharp
    (0xB0, 0xE2, "Sharp LH28F008", 0x00100000),
    // SST
    (0xBF, 0x61, "SST 49LF020", 0x00040000),
    (0xBF, 0x51, "SST 49LF040", 0x00080000),
    (0xBF, 0x5B, "SST 49LF080A", 0x00100000),
    (0xBF, 0x10, "SST 29EE020", 0x00040000),
    (0xBF, 0xB6, "SST 39SF020A", 0x00040000),
    // Macronix
    (0xC2, 0x36, "Macronix MX29F022T", 0x00040000),
    (0xC2, 0xA4, "Macronix MX29F040", 0x00080000),
    (0xC2, 0xAD, "Macronix MX29F016", 0x00200000),
    // Winbond
    (0xDA, 0x0B, "Winbond W49F002U", 0x00040000),
    (0xDA, 0x8C, "Winbond W49F020T", 0x00040000),
    (0xDA, 0x3D, "Winbond W39V040A", 0x00080000),
    (0xDA, 0x45, "Winbond W29C020C", 0x00040000),
];
