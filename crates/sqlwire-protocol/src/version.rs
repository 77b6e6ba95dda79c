//! TDS protocol version definitions.

use core::fmt;

/// TDS protocol version as carried in LOGIN7 and LOGINACK.
///
/// The wire value is compared numerically; every 7.x revision sorts in
/// release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.0 (SQL Server 7.0)
    pub const V7_0: Self = Self(0x7000_0000);

    /// TDS 7.1 Revision 1 (SQL Server 2000 SP1)
    pub const V7_1: Self = Self(0x7100_0001);

    /// TDS 7.2 (SQL Server 2005)
    pub const V7_2: Self = Self(0x7209_0002);

    /// TDS 7.3A (SQL Server 2008)
    pub const V7_3A: Self = Self(0x730A_0003);

    /// TDS 7.3B (SQL Server 2008 R2)
    pub const V7_3B: Self = Self(0x730B_0003);

    /// TDS 7.4 (SQL Server 2012+)
    pub const V7_4: Self = Self(0x7400_0004);

    /// Create a version from its wire value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// DONE tokens carry a 64-bit row count from TDS 7.2 on, 32-bit before.
    #[must_use]
    pub const fn has_64bit_row_count(self) -> bool {
        self.0 >= Self::V7_2.0
    }

    /// DATE, TIME, DATETIME2 and DATETIMEOFFSET exist from TDS 7.3 on.
    #[must_use]
    pub const fn supports_date_time_types(self) -> bool {
        self.0 >= Self::V7_3A.0
    }

    /// PLP-encoded MAX types exist from TDS 7.2 on.
    #[must_use]
    pub const fn supports_plp(self) -> bool {
        self.0 >= Self::V7_2.0
    }

    /// Logical minor version (0 for 7.0, 4 for 7.4).
    #[must_use]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 24) & 0x0F) as u8
    }

    /// Revision letter for the two TDS 7.3 variants.
    #[must_use]
    pub const fn revision_suffix(self) -> Option<char> {
        match self.0 {
            0x730A_0003 => Some('A'),
            0x730B_0003 => Some('B'),
            _ => None,
        }
    }

    /// Parse "7.0" through "7.4", with "7.3A"/"7.3B" accepted.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "7.0" => Some(Self::V7_0),
            "7.1" => Some(Self::V7_1),
            "7.2" => Some(Self::V7_2),
            "7.3" | "7.3a" => Some(Self::V7_3A),
            "7.3b" => Some(Self::V7_3B),
            "7.4" => Some(Self::V7_4),
            _ => None,
        }
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TDS 7.{}", self.minor())?;
        if let Some(rev) = self.revision_suffix() {
            write!(f, "{rev}")?;
        }
        Ok(())
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl From<u32> for TdsVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<TdsVersion> for u32 {
    fn from(version: TdsVersion) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_follows_releases() {
        assert!(TdsVersion::V7_0 < TdsVersion::V7_1);
        assert!(TdsVersion::V7_2 < TdsVersion::V7_3A);
        assert!(TdsVersion::V7_3A < TdsVersion::V7_3B);
        assert!(TdsVersion::V7_3B < TdsVersion::V7_4);
    }

    #[test]
    fn test_row_count_width() {
        assert!(!TdsVersion::V7_1.has_64bit_row_count());
        assert!(TdsVersion::V7_2.has_64bit_row_count());
        assert!(TdsVersion::V7_4.has_64bit_row_count());
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(TdsVersion::parse("7.3b"), Some(TdsVersion::V7_3B));
        assert_eq!(TdsVersion::parse(" 7.4 "), Some(TdsVersion::V7_4));
        assert_eq!(TdsVersion::parse("8.0"), None);
        assert_eq!(TdsVersion::V7_3A.to_string(), "TDS 7.3A");
        assert_eq!(TdsVersion::V7_4.to_string(), "TDS 7.4");
    }
}
