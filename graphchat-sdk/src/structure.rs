//! XYZ molecular coordinate listings held in the `xyz` text.
//!
//! ```text
//! 3                      <- atom count
//! water                  <- free-text comment
//! O  0.000  0.000  0.117 <- one `<element> <x> <y> <z>` record per atom
//! H  0.000  0.757 -0.467
//! H  0.000 -0.757 -0.467
//! ```

use std::fmt;

/// Check the line arithmetic of an XYZ listing.
///
/// The first line must parse as an integer `n` and the listing must have at
/// least `n + 2` lines. Atom records themselves are not inspected.
pub fn validate_xyz_format(content: &str) -> bool {
    let lines: Vec<&str> = content.trim().lines().collect();
    if lines.len() < 2 {
        return false;
    }
    match lines[0].trim().parse::<i64>() {
        Ok(count) => lines.len() as i64 >= count.saturating_add(2),
        Err(_) => false,
    }
}

/// Errors from [`XyzStructure::parse`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum XyzError {
    #[error("missing atom count line")]
    MissingCount,
    #[error("invalid atom count {0:?}")]
    InvalidCount(String),
    #[error("expected {expected} atom records, found {found}")]
    MissingAtoms { expected: usize, found: usize },
    #[error("line {line}: {reason}")]
    InvalidAtom { line: usize, reason: String },
}

/// One atom record.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub element: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Atom {
    pub fn new(element: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            element: element.into(),
            x,
            y,
            z,
        }
    }
}

/// A parsed XYZ listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XyzStructure {
    pub comment: String,
    pub atoms: Vec<Atom>,
}

impl XyzStructure {
    pub fn new(comment: impl Into<String>, atoms: Vec<Atom>) -> Self {
        Self {
            comment: comment.into(),
            atoms,
        }
    }

    /// Parse a listing, reading exactly as many atom records as declared.
    /// Lines after the declared atoms are ignored.
    pub fn parse(content: &str) -> Result<Self, XyzError> {
        let mut lines = content.lines();

        let count_line = lines.next().ok_or(XyzError::MissingCount)?;
        let expected: usize = count_line
            .trim()
            .parse()
            .map_err(|_| XyzError::InvalidCount(count_line.trim().to_string()))?;

        let comment = lines.next().unwrap_or_default().to_string();

        let mut atoms = Vec::with_capacity(expected);
        for (offset, line) in lines.take(expected).enumerate() {
            atoms.push(parse_atom(line, offset + 3)?);
        }
        if atoms.len() < expected {
            return Err(XyzError::MissingAtoms {
                expected,
                found: atoms.len(),
            });
        }

        Ok(Self { comment, atoms })
    }
}

fn parse_atom(line: &str, line_no: usize) -> Result<Atom, XyzError> {
    let invalid = |reason: String| XyzError::InvalidAtom {
        line: line_no,
        reason,
    };

    let mut fields = line.split_whitespace();
    let element = fields
        .next()
        .ok_or_else(|| invalid("empty atom record".to_string()))?;

    let mut coords = [0.0f64; 3];
    for (axis, slot) in ["x", "y", "z"].iter().zip(coords.iter_mut()) {
        let raw = fields
            .next()
            .ok_or_else(|| invalid(format!("missing {axis} coordinate")))?;
        *slot = raw
            .parse()
            .map_err(|_| invalid(format!("bad {axis} coordinate {raw:?}")))?;
    }

    Ok(Atom::new(element, coords[0], coords[1], coords[2]))
}

impl fmt::Display for XyzStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.atoms.len())?;
        write!(f, "{}", self.comment)?;
        for atom in &self.atoms {
            write!(f, "\n{} {} {} {}", atom.element, atom.x, atom.y, atom.z)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_complete_listing() {
        assert!(validate_xyz_format("2\ncomment\nC 0 0 0\nH 0 0 1"));
    }

    #[test]
    fn test_validate_rejects_non_numeric_count() {
        assert!(!validate_xyz_format("not-a-number\nfoo"));
    }

    #[test]
    fn test_validate_rejects_short_listing() {
        assert!(!validate_xyz_format("3\ncomment\nC 0 0 0"));
    }

    #[test]
    fn test_validate_edge_cases() {
        assert!(!validate_xyz_format(""));
        assert!(!validate_xyz_format("0"));
        assert!(validate_xyz_format("0\nempty molecule"));
        assert!(validate_xyz_format("  1 \ncomment\nHe 0 0 0\n\n"));
        assert!(validate_xyz_format("1\r\ncomment\r\nHe 0 0 0"));
    }

    #[test]
    fn test_parse_water() {
        let text = "3\nwater\nO 0.0 0.0 0.117\nH 0.0 0.757 -0.467\nH 0.0 -0.757 -0.467";
        let structure = XyzStructure::parse(text).unwrap();

        assert_eq!(structure.comment, "water");
        assert_eq!(structure.atoms.len(), 3);
        assert_eq!(structure.atoms[1], Atom::new("H", 0.0, 0.757, -0.467));
    }

    #[test]
    fn test_parse_reports_missing_atoms() {
        let err = XyzStructure::parse("3\ncomment\nC 0 0 0").unwrap_err();
        assert_eq!(err, XyzError::MissingAtoms { expected: 3, found: 1 });
    }

    #[test]
    fn test_parse_reports_bad_coordinate() {
        let err = XyzStructure::parse("1\n\nC 0 zero 0").unwrap_err();
        match err {
            XyzError::InvalidAtom { line, reason } => {
                assert_eq!(line, 3);
                assert!(reason.contains("y"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_display_is_valid_listing() {
        let structure = XyzStructure::new(
            "caffeine fragment",
            vec![Atom::new("N", -0.52, 1.41, 0.0), Atom::new("C", -1.78, 0.86, 1.0)],
        );
        let text = structure.to_string();

        assert!(validate_xyz_format(&text));
        assert_eq!(XyzStructure::parse(&text).unwrap(), structure);
    }
}
