//! Partial-match query planner (component E): turns a query template
//! into a bucket-enumeration plan over the unknown address bits, and
//! drives a cursor across the matching buckets' tuples.

use crate::bits::{clear_bit, low_k, set_bit, test_bit};
use crate::chvec::hash_attr;
use crate::error::Result;
use crate::page::NO_PAGE;
use crate::reln::Relation;
use crate::tuple::{is_wildcard, split_byte_fields, split_fields};

/// A scan in progress over the buckets consistent with a query
/// template's known attributes.
///
/// Borrows the relation read-only for its lifetime: the Rust borrow
/// checker enforces the "no insert while a cursor is open" rule that
/// the on-disk format can only assume.
pub struct Cursor<'r> {
    rel: &'r Relation,
    known: u32,
    unknown_index: Vec<u32>,
    cover: u32,
    cur_page: u32,
    prev_page: u32,
    is_overflow: bool,
    examined: u32,
    query_fields: Vec<String>,
}

/// Computes the bucket address for a given cover of the unknown bits,
/// or `NO_PAGE` if that combination isn't addressable at the
/// directory's current shape.
fn page_id_of(rel: &Relation, cover: u32, known: u32, unknown_index: &[u32]) -> u32 {
    let mut raw = known;
    for (j, &pos) in unknown_index.iter().enumerate() {
        raw = if test_bit(cover, j as u32) {
            set_bit(raw, pos)
        } else {
            clear_bit(raw, pos)
        };
    }
    let mut pid = low_k(raw, rel.depth());
    if pid < rel.splitp() {
        pid = low_k(raw, rel.depth() + 1);
    }
    if pid >= rel.npages() {
        NO_PAGE
    } else {
        pid
    }
}

/// Builds a scan plan for `query` against `rel`. Returns `None` if the
/// template's arity does not match the relation (`malformed_query`).
pub fn start_query<'r>(rel: &'r Relation, query: &str) -> Option<Cursor<'r>> {
    let fields = split_fields(query);
    if fields.len() as u32 != rel.nattrs() {
        log::debug!(
            "malformed query {:?}: relation has {} attributes, query has {}",
            query,
            rel.nattrs(),
            fields.len()
        );
        return None;
    }

    let width = rel.depth() + 1;
    let cv = rel.chvec();
    let mut known = 0u32;
    let mut unknown_index = Vec::new();
    for i in 0..width {
        let entry = cv[i as usize];
        let field = fields[entry.attr as usize];
        if is_wildcard(field) {
            unknown_index.push(i);
        } else if test_bit(hash_attr(field.as_bytes()), entry.bit) {
            known = set_bit(known, i);
        }
    }

    let first_page = page_id_of(rel, 0, known, &unknown_index);
    log::trace!("start_query {:?}: first candidate bucket = {}", query, first_page);

    Some(Cursor {
        rel,
        known,
        unknown_index,
        cover: 0,
        cur_page: first_page,
        prev_page: first_page,
        is_overflow: false,
        examined: 0,
        query_fields: fields.into_iter().map(str::to_owned).collect(),
    })
}

impl<'r> Cursor<'r> {
    /// Advances the scan and returns the next matching tuple, or `None`
    /// once every candidate bucket has been exhausted.
    pub fn next_tuple(&mut self) -> Result<Option<String>> {
        loop {
            if self.cur_page == NO_PAGE {
                return Ok(None);
            }

            let page = if self.is_overflow {
                self.rel.ovflow_file().borrow_mut().get_page(self.cur_page)?
            } else {
                self.rel.data_file().borrow_mut().get_page(self.cur_page)?
            };

            if self.examined < page.n_tuples() {
                let mut found = None;
                for t in page.tuples().skip(self.examined as usize) {
                    self.examined += 1;
                    if self.matches(t) {
                        found = Some(t.to_vec());
                        break;
                    }
                }
                if let Some(t) = found {
                    return Ok(Some(String::from_utf8_lossy(&t).into_owned()));
                }
                continue;
            }

            let overflow = page.overflow();
            if overflow != NO_PAGE {
                self.is_overflow = true;
                self.cur_page = overflow;
                self.examined = 0;
                continue;
            }

            let nunknowns = self.unknown_index.len() as u32;
            let total_covers = if nunknowns >= 32 { u32::MAX } else { 1u32 << nunknowns };
            self.cover += 1;
            if self.cover >= total_covers {
                self.cur_page = NO_PAGE;
                return Ok(None);
            }
            let next_pid = page_id_of(self.rel, self.cover, self.known, &self.unknown_index);
            if next_pid == NO_PAGE || next_pid <= self.prev_page {
                self.cur_page = NO_PAGE;
                return Ok(None);
            }
            self.prev_page = next_pid;
            self.cur_page = next_pid;
            self.is_overflow = false;
            self.examined = 0;
        }
    }

    fn matches(&self, tuple_bytes: &[u8]) -> bool {
        let fields = split_byte_fields(tuple_bytes);
        for (i, q) in self.query_fields.iter().enumerate() {
            if is_wildcard(q) {
                continue;
            }
            if fields.get(i).copied() != Some(q.as_bytes()) {
                return false;
            }
        }
        true
    }

    /// Releases cursor-owned state. A no-op beyond ordinary drop:
    /// Rust's ownership already frees everything once the cursor goes
    /// out of scope.
    pub fn close(self) {}
}

impl Relation {
    /// Convenience entry point equivalent to `query::start_query(self, q)`.
    pub fn query<'r>(&'r self, q: &str) -> Option<Cursor<'r>> {
        start_query(self, q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_relation_name() -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = env::temp_dir();
        path.push(format!("linhash_query_test_{}_{}", std::process::id(), n));
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn exact_literal_query_finds_single_tuple() {
        let name = temp_relation_name();
        Relation::create(&name, 3, 1, 0, "0:0,1:0,2:0").unwrap();
        let mut r = Relation::open(&name, true).unwrap();
        r.add_to_relation("1,2,3").unwrap();

        let mut cur = r.query("1,2,3").unwrap();
        assert_eq!(cur.next_tuple().unwrap(), Some("1,2,3".to_string()));
        assert_eq!(cur.next_tuple().unwrap(), None);
        cur.close();
        r.close().unwrap();
    }

    #[test]
    fn partial_match_returns_all_matching_tuples() {
        let name = temp_relation_name();
        Relation::create(&name, 3, 1, 0, "0:0,1:0,2:0").unwrap();
        let mut r = Relation::open(&name, true).unwrap();
        r.add_to_relation("1,2,3").unwrap();
        r.add_to_relation("1,2,4").unwrap();
        r.add_to_relation("5,2,3").unwrap();

        let mut cur = r.query("?,2,?").unwrap();
        let mut got = Vec::new();
        while let Some(t) = cur.next_tuple().unwrap() {
            got.push(t);
        }
        got.sort();
        assert_eq!(got, vec!["1,2,3".to_string(), "1,2,4".to_string(), "5,2,3".to_string()]);
        r.close().unwrap();
    }

    #[test]
    fn wrong_arity_query_yields_no_cursor() {
        let name = temp_relation_name();
        Relation::create(&name, 3, 1, 0, "0:0,1:0,2:0").unwrap();
        let r = Relation::open(&name, true).unwrap();
        assert!(r.query("a,b").is_none());
        r.close().unwrap();
    }

    #[test]
    fn all_wildcards_returns_every_tuple_exactly_once() {
        let name = temp_relation_name();
        Relation::create(&name, 3, 1, 0, "0:0,1:0,2:0").unwrap();
        let mut r = Relation::open(&name, true).unwrap();
        for i in 0..100 {
            r.add_to_relation(&format!("{},{},{}", i, i, i)).unwrap();
        }
        let mut cur = r.query("?,?,?").unwrap();
        let mut count = 0;
        while cur.next_tuple().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 100);
        r.close().unwrap();
    }
}
