//! Next-GTID directive (`@@SESSION.GTID_NEXT`)

use super::error::{parse_error, GtidResult};
use super::{is_valid_gno, Gno, Gtid, Sid, SidMap};

/// What the next transaction of a session should be identified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NextGtid {
    /// Server assigns the next free GNO of its own sidno
    #[default]
    Automatic,
    /// Transaction is logged without a GTID
    Anonymous,
    /// An explicit GTID was consumed by the previous transaction; the client
    /// must set a new directive before the next statement
    Undefined,
    /// Use this exact GTID
    Explicit(Gtid),
}

impl NextGtid {
    /// Parse `AUTOMATIC`, `ANONYMOUS` or `<uuid>:<gno>`, registering the uuid in `sid_map`
    pub fn parse(text: &str, sid_map: &mut SidMap) -> GtidResult<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("AUTOMATIC") {
            return Ok(Self::Automatic);
        }
        if trimmed.eq_ignore_ascii_case("ANONYMOUS") {
            return Ok(Self::Anonymous);
        }

        let (sid, gno) = parse_gtid_text(trimmed)?;
        let sidno = sid_map.add(sid)?;
        Ok(Self::Explicit(Gtid::new(sidno, gno)))
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }

    pub fn to_text(&self, sid_map: &SidMap) -> String {
        match self {
            Self::Automatic => "AUTOMATIC".to_string(),
            Self::Anonymous => "ANONYMOUS".to_string(),
            Self::Undefined => "UNDEFINED".to_string(),
            Self::Explicit(gtid) => gtid_to_text(*gtid, sid_map),
        }
    }
}

/// Split `<uuid>:<gno>` without touching any sid map
pub(crate) fn parse_gtid_text(text: &str) -> GtidResult<(Sid, Gno)> {
    let (sid, gno) = text
        .split_once(':')
        .ok_or_else(|| parse_error(text, "expected <uuid>:<gno>"))?;
    let sid: Sid = sid.parse()?;
    let gno: Gno = gno
        .trim()
        .parse()
        .map_err(|_| parse_error(text, format!("invalid GNO '{}'", gno.trim())))?;
    if !is_valid_gno(gno) {
        return Err(parse_error(text, format!("GNO {} out of range", gno)));
    }
    Ok((sid, gno))
}

/// `<uuid>:<gno>`, falling back to `<sidno>:<gno>` for unmapped sidnos
pub(crate) fn gtid_to_text(gtid: Gtid, sid_map: &SidMap) -> String {
    match sid_map.sidno_to_sid(gtid.sidno) {
        Some(sid) => format!("{}:{}", sid, gtid.gno),
        None => gtid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtid::GtidError;

    const UUID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    #[test]
    fn test_parse_keywords() {
        let mut map = SidMap::new();
        assert_eq!(NextGtid::parse("automatic", &mut map).unwrap(), NextGtid::Automatic);
        assert_eq!(NextGtid::parse(" ANONYMOUS ", &mut map).unwrap(), NextGtid::Anonymous);
        assert!(map.is_empty());
    }

    #[test]
    fn test_parse_explicit() {
        let mut map = SidMap::new();
        let next = NextGtid::parse(&format!("{}:42", UUID), &mut map).unwrap();
        assert_eq!(next, NextGtid::Explicit(Gtid::new(1, 42)));
        assert!(next.is_explicit());
        assert_eq!(next.to_text(&map), format!("{}:42", UUID));
    }

    #[test]
    fn test_parse_rejects_bad_gno() {
        let mut map = SidMap::new();
        for bad in [format!("{}:0", UUID), format!("{}:-3", UUID), format!("{}:abc", UUID), UUID.to_string()] {
            assert!(matches!(NextGtid::parse(&bad, &mut map), Err(GtidError::Parse { .. })));
        }
        assert!(map.is_empty());
    }
}
