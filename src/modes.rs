use std::fmt;

/// Security mode bits carried in the Server-Greeting and Set-Up-Response
/// (RFC 4656 Section 3.1).
///
/// The server announces the bitwise OR of every mode it is willing to use;
/// the client answers with exactly one of them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SecurityMode {
    /// No mode offered; the server refuses to talk to us.
    Unspecified = 0,
    /// Unauthenticated mode, the only one this client implements.
    Unauthenticated = 1,
    /// Authenticated mode (HMAC on control and test packets).
    Authenticated = 2,
    /// Encrypted mode.
    Encrypted = 4,
}

impl SecurityMode {
    /// Returns the wire value of this mode.
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Returns true if this mode's bit is present in an announced mode word.
    pub fn offered_in(self, modes: u32) -> bool {
        match self {
            SecurityMode::Unspecified => modes == 0,
            _ => modes & self.bits() != 0,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SecurityMode::Unspecified => write!(f, "unspecified"),
            SecurityMode::Unauthenticated => write!(f, "unauthenticated"),
            SecurityMode::Authenticated => write!(f, "authenticated"),
            SecurityMode::Encrypted => write!(f, "encrypted"),
        }
    }
}

/// Renders an announced mode word as a readable list, e.g. `authenticated|encrypted`.
pub fn describe_modes(modes: u32) -> String {
    if modes == 0 {
        return SecurityMode::Unspecified.to_string();
    }
    let mut names: Vec<String> = [
        SecurityMode::Unauthenticated,
        SecurityMode::Authenticated,
        SecurityMode::Encrypted,
    ]
    .iter()
    .filter(|m| m.offered_in(modes))
    .map(|m| m.to_string())
    .collect();

    let known = SecurityMode::Unauthenticated.bits()
        | SecurityMode::Authenticated.bits()
        | SecurityMode::Encrypted.bits();
    if modes & !known != 0 {
        names.push(format!("{:#x}", modes & !known));
    }
    names.join("|")
}
