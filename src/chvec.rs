//! Choice vector and hash composer (component C): maps an address bit
//! to an (attribute, hash-bit) pair, and composes a bucket address by
//! pulling one bit out of each attribute's hash.

use crate::bits::{set_bit, test_bit};
use crate::error::{Error, Result};

/// Maximum number of address bits a choice vector can supply - one
/// entry per bit of the 32-bit hash space this crate works in.
pub const MAXCHVEC: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChoiceVectorEntry {
    pub attr: u32,
    pub bit: u32,
}

pub type ChoiceVector = Vec<ChoiceVectorEntry>;

/// Parses a choice-vector spec of the form `"attr:bit,attr:bit,..."`
/// (e.g. `"0:0,1:0,2:0"`) into a full `MAXCHVEC`-entry vector.
///
/// Fewer entries than `MAXCHVEC` are accepted: the given pattern is
/// cycled to fill the remaining address bits, incrementing the hash
/// bit by one on every full pass through the pattern so that deeper
/// address bits keep drawing fresh bits from the same attributes
/// rather than repeating the first pass forever.
pub fn parse_choice_vector(spec: &str, nattrs: u32) -> Result<ChoiceVector> {
    let mut given = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::InvalidChoiceVector(format!(
                "empty entry in {:?}",
                spec
            )));
        }
        let (attr_s, bit_s) = token.split_once(':').ok_or_else(|| {
            Error::InvalidChoiceVector(format!("entry {:?} is not attr:bit", token))
        })?;
        let attr: u32 = attr_s
            .parse()
            .map_err(|_| Error::InvalidChoiceVector(format!("bad attribute index {:?}", attr_s)))?;
        let bit: u32 = bit_s
            .parse()
            .map_err(|_| Error::InvalidChoiceVector(format!("bad bit position {:?}", bit_s)))?;
        if attr >= nattrs {
            return Err(Error::InvalidChoiceVector(format!(
                "attribute {} out of range for {} attributes",
                attr, nattrs
            )));
        }
        given.push(ChoiceVectorEntry { attr, bit });
    }
    if given.is_empty() {
        return Err(Error::InvalidChoiceVector("choice vector is empty".into()));
    }

    let mut cv = Vec::with_capacity(MAXCHVEC);
    for i in 0..MAXCHVEC {
        let base = i % given.len();
        let cycle = (i / given.len()) as u32;
        let entry = given[base];
        cv.push(ChoiceVectorEntry {
            attr: entry.attr,
            bit: entry.bit + cycle,
        });
    }
    Ok(cv)
}

/// Bob Jenkins' one-at-a-time hash: a small, deterministic 32-bit
/// byte mixer, stable across runs (unlike `std`'s `DefaultHasher`,
/// which is keyed by a random seed per process and so cannot be used
/// for an on-disk address function).
pub fn hash_attr(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in bytes {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}

/// Composes the bucket address of a tuple: for each address bit `i`
/// in `[0, depth+1)`, writes bit `cv[i].bit` of `hash_attr(attrs[cv[i].attr])`
/// into output bit `i`. Bits `>= depth+1` are left zero.
pub fn tuple_hash(cv: &[ChoiceVectorEntry], attrs: &[&[u8]], depth: u32) -> u32 {
    let width = depth + 1;
    let mut cache: Vec<Option<u32>> = vec![None; attrs.len()];
    let mut out = 0u32;
    for i in 0..width {
        let entry = cv[i as usize];
        let h = *cache[entry.attr as usize].get_or_insert_with(|| hash_attr(attrs[entry.attr as usize]));
        if test_bit(h, entry.bit) {
            out = set_bit(out, i);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_spec() {
        let cv = parse_choice_vector("0:0,1:0,2:0", 3).unwrap();
        assert_eq!(cv.len(), MAXCHVEC);
        assert_eq!(cv[0], ChoiceVectorEntry { attr: 0, bit: 0 });
        assert_eq!(cv[1], ChoiceVectorEntry { attr: 1, bit: 0 });
        assert_eq!(cv[2], ChoiceVectorEntry { attr: 2, bit: 0 });
        // second pass through the pattern uses bit 1
        assert_eq!(cv[3], ChoiceVectorEntry { attr: 0, bit: 1 });
    }

    #[test]
    fn rejects_out_of_range_attribute() {
        assert!(parse_choice_vector("0:0,5:0", 3).is_err());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(parse_choice_vector("0-0", 3).is_err());
        assert!(parse_choice_vector("", 3).is_err());
    }

    #[test]
    fn hash_attr_is_deterministic() {
        assert_eq!(hash_attr(b"hello"), hash_attr(b"hello"));
        assert_ne!(hash_attr(b"hello"), hash_attr(b"world"));
    }

    #[test]
    fn tuple_hash_only_touches_requested_width() {
        let cv = parse_choice_vector("0:0,1:0,2:0", 3).unwrap();
        let attrs: Vec<&[u8]> = vec![b"1", b"2", b"3"];
        let h0 = tuple_hash(&cv, &attrs, 0);
        assert!(h0 <= 1); // only bit 0 can be set
    }
}
