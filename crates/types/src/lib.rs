//! Validated value types shared by every filestore crate.
//!
//! [`FileName`] is the only way a client-supplied name reaches the filesystem, so the
//! path-traversal rules live here rather than in each caller. [`FileId`] is the numeric
//! identifier derived from a name.

use std::fmt;

/// Maximum length, in bytes, of a stored file name.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Errors that can occur when validating a file name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// The input was empty
    #[error("file name cannot be empty")]
    Empty,

    /// The input exceeded [`MAX_FILE_NAME_LEN`] bytes
    #[error("file name exceeds maximum length of {max} bytes", max = MAX_FILE_NAME_LEN)]
    TooLong,

    /// The input contained a path separator or NUL
    #[error("file name contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// The input was `.` or `..`
    #[error("file name {0:?} is reserved")]
    Reserved(String),
}

/// A file name that is safe to join onto the storage directory.
///
/// The name is guaranteed to be a single, non-empty path component: it contains no `/`,
/// `\` or NUL, and is neither `.` nor `..`. Unlike free text, the input is not trimmed;
/// `" a.txt"` and `"a.txt"` are different files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileName(String);

impl FileName {
    /// Validates `input` as a single path component.
    ///
    /// # Errors
    ///
    /// Returns a [`NameError`] describing the first rule the input breaks.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, NameError> {
        let input = input.as_ref();

        if input.is_empty() {
            return Err(NameError::Empty);
        }

        if input.len() > MAX_FILE_NAME_LEN {
            return Err(NameError::TooLong);
        }

        if let Some(c) = input.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
            return Err(NameError::InvalidCharacter(c));
        }

        if input == "." || input == ".." {
            return Err(NameError::Reserved(input.to_owned()));
        }

        Ok(Self(input.to_owned()))
    }

    /// Name assigned to the `n`th anonymous upload: `newFile<n>.dat`.
    pub fn generated(n: u32) -> Self {
        Self(format!("newFile{n}.dat"))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the numeric id for this name.
    pub fn id(&self) -> FileId {
        FileId::from_name(&self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for FileName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for FileName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileName::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Numeric identifier of a stored file.
///
/// Ids are a pure function of the file name: the base-31 polynomial hash of the name's
/// UTF-16 code units, wrapped to `i32`, made non-negative. Two different names can map
/// to the same id; callers must check before assigning.
///
/// The value always fits in a non-negative `i32`, which is how it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct FileId(u32);

impl FileId {
    /// Computes the id for `name`.
    pub fn from_name(name: &str) -> Self {
        let hash = name
            .encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));

        // `i32::MIN` has no positive counterpart; masking sends it to 0.
        Self(hash.unsigned_abs() & 0x7fff_ffff)
    }

    /// Parses a client-supplied locator. Anything other than a non-negative integer that
    /// fits in `i32` yields `None`.
    pub fn parse(input: &str) -> Option<Self> {
        input
            .trim()
            .parse::<i32>()
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .map(Self)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The id as sent on the wire.
    pub fn to_wire(self) -> i32 {
        // Construction guarantees the top bit is clear.
        self.0 as i32
    }

    /// Reads an id received on the wire; negative values are not ids.
    pub fn from_wire(value: i32) -> Option<Self> {
        u32::try_from(value).ok().map(Self)
    }
}

impl<'de> serde::Deserialize<'de> for FileId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        i32::try_from(value)
            .ok()
            .and_then(FileId::from_wire)
            .ok_or_else(|| serde::de::Error::custom(format!("file id {value} exceeds i32::MAX")))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_plain_names() {
        for name in ["a.txt", "newFile1.dat", "with space", "ünïcødé", "..hidden", "a..b"] {
            assert_eq!(FileName::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(FileName::parse(""), Err(NameError::Empty));
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert_eq!(
            FileName::parse("../etc/passwd"),
            Err(NameError::InvalidCharacter('/'))
        );
        assert_eq!(
            FileName::parse("..\\boot.ini"),
            Err(NameError::InvalidCharacter('\\'))
        );
        assert!(matches!(FileName::parse(".."), Err(NameError::Reserved(_))));
        assert!(matches!(FileName::parse("."), Err(NameError::Reserved(_))));
        assert_eq!(
            FileName::parse("a\0b"),
            Err(NameError::InvalidCharacter('\0'))
        );
    }

    #[test]
    fn test_parse_rejects_too_long() {
        let long = "x".repeat(MAX_FILE_NAME_LEN + 1);
        assert_eq!(FileName::parse(long), Err(NameError::TooLong));

        let max = "x".repeat(MAX_FILE_NAME_LEN);
        assert!(FileName::parse(max).is_ok());
    }

    #[test]
    fn test_generated_names() {
        assert_eq!(FileName::generated(1).as_str(), "newFile1.dat");
        assert_eq!(FileName::generated(42).as_str(), "newFile42.dat");
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = FileName::parse("report.pdf").unwrap();
        let b = FileName::parse("report.pdf").unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_id_known_values() {
        // "a" = 97, "ab" = 97 * 31 + 98
        assert_eq!(FileId::from_name("a").get(), 97);
        assert_eq!(FileId::from_name("ab").get(), 3105);
        assert_eq!(FileId::from_name("").get(), 0);
    }

    #[test]
    fn test_id_is_never_negative_on_wire() {
        for name in ["newFile1.dat", "some rather long file name.tar.gz", "zzzzzzzzzzzz"] {
            assert!(FileId::from_name(name).to_wire() >= 0);
        }
    }

    #[test]
    fn test_id_parse() {
        assert_eq!(FileId::parse("97"), Some(FileId::from_name("a")));
        assert_eq!(FileId::parse(" 97 "), Some(FileId::from_name("a")));
        assert_eq!(FileId::parse("-1"), None);
        assert_eq!(FileId::parse("abc"), None);
        assert_eq!(FileId::parse(""), None);
        assert_eq!(FileId::parse("99999999999"), None);
    }

    #[test]
    fn test_file_name_serde_validates() {
        let json = serde_json::to_string(&FileName::parse("a.txt").unwrap()).unwrap();
        assert_eq!(json, "\"a.txt\"");

        let bad: Result<FileName, _> = serde_json::from_str("\"../x\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_file_id_serde_rejects_ids_outside_wire_range() {
        let id: FileId = serde_json::from_str("97").unwrap();
        assert_eq!(id, FileId::from_name("a"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "97");

        let max: FileId = serde_json::from_str("2147483647").unwrap();
        assert_eq!(max.to_wire(), i32::MAX);

        let too_big: Result<FileId, _> = serde_json::from_str("2147483648");
        assert!(too_big.is_err());
        let negative: Result<FileId, _> = serde_json::from_str("-1");
        assert!(negative.is_err());
    }
}
