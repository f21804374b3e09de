//! Differentiated Services code points (RFC 2474, RFC 2597, RFC 3246),
//! expressed as full TOS byte values (DSCP shifted left by two).

pub const BE: u8 = 0x00;
pub const CS1: u8 = 0x20;
pub const AF11: u8 = 0x28;
pub const AF12: u8 = 0x30;
pub const AF13: u8 = 0x38;
pub const CS2: u8 = 0x40;
pub const AF21: u8 = 0x48;
pub const AF22: u8 = 0x50;
pub const AF23: u8 = 0x58;
pub const CS3: u8 = 0x60;
pub const AF31: u8 = 0x68;
pub const AF32: u8 = 0x70;
pub const AF33: u8 = 0x78;
pub const CS4: u8 = 0x80;
pub const AF41: u8 = 0x88;
pub const AF42: u8 = 0x90;
pub const AF43: u8 = 0x98;
pub const CS5: u8 = 0xA0;
pub const EF: u8 = 0xB8;
pub const CS6: u8 = 0xC0;
pub const CS7: u8 = 0xE0;

const NAMED: &[(&str, u8)] = &[
    ("BE", BE),
    ("CS1", CS1),
    ("AF11", AF11),
    ("AF12", AF12),
    ("AF13", AF13),
    ("CS2", CS2),
    ("AF21", AF21),
    ("AF22", AF22),
    ("AF23", AF23),
    ("CS3", CS3),
    ("AF31", AF31),
    ("AF32", AF32),
    ("AF33", AF33),
    ("CS4", CS4),
    ("AF41", AF41),
    ("AF42", AF42),
    ("AF43", AF43),
    ("CS5", CS5),
    ("EF", EF),
    ("CS6", CS6),
    ("CS7", CS7),
];

/// Looks up a TOS value by its code point name, case-insensitively.
pub fn from_name(name: &str) -> Option<u8> {
    NAMED
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, v)| v)
}

/// Returns the code point name for a TOS value, if it is a standard one.
pub fn name_of(tos: u8) -> Option<&'static str> {
    NAMED.iter().find(|&&(_, v)| v == tos).map(|&(n, _)| n)
}
