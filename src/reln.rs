//! Relation / linear-hash directory (component D): the on-disk
//! descriptor that tracks depth, split pointer, page count, tuple
//! count and choice vector, and drives inserts and splits.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::low_k;
use crate::chvec::{parse_choice_vector, tuple_hash, ChoiceVector, ChoiceVectorEntry, MAXCHVEC};
use crate::error::{Error, Result};
use crate::page::{Page, NO_PAGE, PAGESIZE};
use crate::store::PageFile;
use crate::tuple::{split_byte_fields, split_fields};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    Read,
    Write,
}

/// An open relation: three file streams plus the in-memory directory
/// state that addresses them.
pub struct Relation {
    nattrs: u32,
    depth: u32,
    sp: u32,
    npages: u32,
    ntups: u32,
    cv: ChoiceVector,
    mode: Mode,
    info_path: PathBuf,
    data: RefCell<PageFile>,
    ovflow: RefCell<PageFile>,
}

/// Diagnostic info about one page in a bucket's primary+overflow chain.
#[derive(Debug, Clone, Copy)]
pub struct PageStats {
    pub page_id: u32,
    pub is_overflow: bool,
    pub ntuples: u32,
    pub free_bytes: u32,
    pub overflow: u32,
}

impl Relation {
    /// Creates the three files backing a new relation and writes its
    /// initial header. The relation is not left open; call `open`
    /// afterwards.
    pub fn create(name: &str, nattrs: u32, npages: u32, depth: u32, cv_spec: &str) -> Result<()> {
        let cv = parse_choice_vector(cv_spec, nattrs)?;

        let mut data = PageFile::new(create_file(&data_path(name))?);
        for _ in 0..npages {
            data.add_page()?;
        }
        let _ovflow = PageFile::new(create_file(&ovflow_path(name))?);

        let mut info = create_file(&info_path(name))?;
        write_header(&mut info, nattrs, depth, 0, npages, 0, &cv)?;
        info.flush()?;

        log::debug!(
            "created relation {:?}: nattrs={} npages={} depth={}",
            name,
            nattrs,
            npages,
            depth
        );
        Ok(())
    }

    /// Opens an existing relation for reading, or for reading and
    /// writing if `writable`.
    pub fn open(name: &str, writable: bool) -> Result<Relation> {
        let mut info = File::open(info_path(name))?;
        let (nattrs, depth, sp, npages, ntups, cv) = read_header(&mut info)?;

        let data = PageFile::new(open_file(&data_path(name), writable)?);
        let ovflow = PageFile::new(open_file(&ovflow_path(name), writable)?);

        Ok(Relation {
            nattrs,
            depth,
            sp,
            npages,
            ntups,
            cv,
            mode: if writable { Mode::Write } else { Mode::Read },
            info_path: info_path(name),
            data: RefCell::new(data),
            ovflow: RefCell::new(ovflow),
        })
    }

    /// Flushes the header (if opened writable) and releases the
    /// relation. Consumes `self`: a closed relation cannot be reused.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        if self.mode == Mode::Write {
            let mut info = create_file(&self.info_path)?;
            write_header(
                &mut info,
                self.nattrs,
                self.depth,
                self.sp,
                self.npages,
                self.ntups,
                &self.cv,
            )?;
            info.flush()?;
        }
        self.data.borrow_mut().flush()?;
        self.ovflow.borrow_mut().flush()?;
        Ok(())
    }

    pub fn nattrs(&self) -> u32 {
        self.nattrs
    }
    pub fn npages(&self) -> u32 {
        self.npages
    }
    pub fn ntuples(&self) -> u32 {
        self.ntups
    }
    pub fn depth(&self) -> u32 {
        self.depth
    }
    pub fn splitp(&self) -> u32 {
        self.sp
    }
    pub fn chvec(&self) -> &[ChoiceVectorEntry] {
        &self.cv
    }

    pub(crate) fn data_file(&self) -> &RefCell<PageFile> {
        &self.data
    }
    pub(crate) fn ovflow_file(&self) -> &RefCell<PageFile> {
        &self.ovflow
    }

    /// Target tuples-per-bucket before a split is due.
    fn limit(&self) -> u32 {
        PAGESIZE as u32 / (10 * self.nattrs)
    }

    /// Inserts `tuple` (a comma-joined field string), returning the
    /// primary-bucket page id it was routed to.
    pub fn add_to_relation(&mut self, tuple: &str) -> Result<u32> {
        if self.ntups > 0 && self.ntups % self.limit() == 0 {
            self.split()?;
        }

        let fields = split_fields(tuple);
        let attr_bytes: Vec<&[u8]> = fields.iter().map(|s| s.as_bytes()).collect();
        let h = tuple_hash(&self.cv, &attr_bytes, self.depth);
        let mut p = low_k(h, self.depth);
        if p < self.sp {
            p = low_k(h, self.depth + 1);
        }

        let pid = self.add_to_bucket(p, tuple.as_bytes())?;
        self.ntups += 1;
        log::trace!("add_to_relation: {:?} -> bucket {} (ntups={})", tuple, pid, self.ntups);
        Ok(pid)
    }

    /// Appends `tuple_bytes` to bucket `p` (primary page `p` plus its
    /// overflow chain), growing the chain if necessary.
    fn add_to_bucket(&mut self, p: u32, tuple_bytes: &[u8]) -> Result<u32> {
        let mut data = self.data.borrow_mut();
        let mut ovflow = self.ovflow.borrow_mut();

        let mut page = data.get_page(p)?;
        if page.add_tuple(tuple_bytes) {
            data.put_page(p, &page)?;
            return Ok(p);
        }

        let mut prev_in_primary = true;
        let mut prev_id = p;
        let mut cur = page.overflow();
        while cur != NO_PAGE {
            let mut ovpage = ovflow.get_page(cur)?;
            if ovpage.add_tuple(tuple_bytes) {
                ovflow.put_page(cur, &ovpage)?;
                return Ok(p);
            }
            prev_in_primary = false;
            prev_id = cur;
            cur = ovpage.overflow();
        }

        let new_id = ovflow.add_page()?;
        let mut new_page = ovflow.get_page(new_id)?;
        if !new_page.add_tuple(tuple_bytes) {
            return Err(Error::OversizeTuple);
        }
        ovflow.put_page(new_id, &new_page)?;

        if prev_in_primary {
            page.set_overflow(new_id);
            data.put_page(p, &page)?;
        } else {
            let mut prev_page = ovflow.get_page(prev_id)?;
            prev_page.set_overflow(new_id);
            ovflow.put_page(prev_id, &prev_page)?;
        }
        log::trace!("bucket {} gained overflow page {}", p, new_id);
        Ok(p)
    }

    /// Migrates bucket `sp` to depth `d+1`, creating its partner bucket.
    fn split(&mut self) -> Result<()> {
        let old = self.sp;
        let new_id = self.data.borrow_mut().add_page()?;
        self.npages += 1;
        debug_assert_eq!(new_id, self.npages - 1);

        let mut chain: Vec<(bool, u32)> = vec![(false, old)];
        {
            let first = self.data.borrow_mut().get_page(old)?;
            let mut cur = first.overflow();
            while cur != NO_PAGE {
                chain.push((true, cur));
                cur = self.ovflow.borrow_mut().get_page(cur)?.overflow();
            }
        }

        let mut staying: Vec<Vec<u8>> = Vec::new();
        for &(is_ovf, id) in &chain {
            let page = if is_ovf {
                self.ovflow.borrow_mut().get_page(id)?
            } else {
                self.data.borrow_mut().get_page(id)?
            };
            for t in page.tuples() {
                let fields = split_byte_fields(t);
                let h = tuple_hash(&self.cv, &fields, self.depth + 1);
                let addr = low_k(h, self.depth + 1);
                if addr == old {
                    staying.push(t.to_vec());
                } else {
                    self.add_to_bucket(new_id, t)?;
                }
            }
        }

        // Repack the tuples that stay back into the same chain of page
        // ids, preserving link structure; the chain length never
        // shrinks, so a trailing page with nothing left gets an empty
        // page rather than being unlinked.
        let mut iter = staying.into_iter().peekable();
        for (idx, &(is_ovf, id)) in chain.iter().enumerate() {
            let mut fresh = Page::new_empty();
            while let Some(next) = iter.peek() {
                if fresh.add_tuple(next) {
                    iter.next();
                } else {
                    break;
                }
            }
            let next_link = chain.get(idx + 1).map(|&(_, nid)| nid).unwrap_or(NO_PAGE);
            fresh.set_overflow(next_link);
            if is_ovf {
                self.ovflow.borrow_mut().put_page(id, &fresh)?;
            } else {
                self.data.borrow_mut().put_page(id, &fresh)?;
            }
        }
        debug_assert!(
            iter.next().is_none(),
            "split produced more staying tuples than the old chain had room for"
        );

        self.sp += 1;
        if self.sp == (1u32 << self.depth) {
            self.depth += 1;
            self.sp = 0;
        }
        log::debug!(
            "split bucket {} -> partner {} (depth={}, sp={})",
            old,
            new_id,
            self.depth,
            self.sp
        );
        Ok(())
    }

    /// Diagnostic dump of every bucket's primary+overflow chain.
    pub fn stats(&self) -> Result<Vec<Vec<PageStats>>> {
        let mut buckets = Vec::with_capacity(self.npages as usize);
        for pid in 0..self.npages {
            let mut chain = Vec::new();
            let page = self.data.borrow_mut().get_page(pid)?;
            chain.push(PageStats {
                page_id: pid,
                is_overflow: false,
                ntuples: page.n_tuples(),
                free_bytes: page.free_space(),
                overflow: page.overflow(),
            });
            let mut cur = page.overflow();
            while cur != NO_PAGE {
                let p = self.ovflow.borrow_mut().get_page(cur)?;
                chain.push(PageStats {
                    page_id: cur,
                    is_overflow: true,
                    ntuples: p.n_tuples(),
                    free_bytes: p.free_space(),
                    overflow: p.overflow(),
                });
                cur = p.overflow();
            }
            log::info!("bucket {}: {} page(s) in chain", pid, chain.len());
            buckets.push(chain);
        }
        Ok(buckets)
    }
}

fn data_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{}.data", name))
}
fn ovflow_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{}.ovflow", name))
}
fn info_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{}.info", name))
}

fn create_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

fn open_file(path: &Path, writable: bool) -> Result<File> {
    Ok(OpenOptions::new().read(true).write(writable).open(path)?)
}

fn write_header(
    w: &mut impl Write,
    nattrs: u32,
    depth: u32,
    sp: u32,
    npages: u32,
    ntups: u32,
    cv: &ChoiceVector,
) -> Result<()> {
    w.write_u32::<LittleEndian>(nattrs)?;
    w.write_u32::<LittleEndian>(depth)?;
    w.write_u32::<LittleEndian>(sp)?;
    w.write_u32::<LittleEndian>(npages)?;
    w.write_u32::<LittleEndian>(ntups)?;
    for entry in cv.iter() {
        w.write_u32::<LittleEndian>(entry.attr)?;
        w.write_u32::<LittleEndian>(entry.bit)?;
    }
    Ok(())
}

fn read_header(r: &mut impl Read) -> Result<(u32, u32, u32, u32, u32, ChoiceVector)> {
    let nattrs = r.read_u32::<LittleEndian>()?;
    let depth = r.read_u32::<LittleEndian>()?;
    let sp = r.read_u32::<LittleEndian>()?;
    let npages = r.read_u32::<LittleEndian>()?;
    let ntups = r.read_u32::<LittleEndian>()?;
    let mut cv = Vec::with_capacity(MAXCHVEC);
    for _ in 0..MAXCHVEC {
        let attr = r.read_u32::<LittleEndian>()?;
        let bit = r.read_u32::<LittleEndian>()?;
        cv.push(ChoiceVectorEntry { attr, bit });
    }
    Ok((nattrs, depth, sp, npages, ntups, cv))
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
        path.push(format!("linhash_reln_test_{}_{}", std::process::id(), n));
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn create_open_close_round_trips_header() {
        let name = temp_relation_name();
        Relation::create(&name, 3, 1, 0, "0:0,1:0,2:0").unwrap();
        let r = Relation::open(&name, true).unwrap();
        assert_eq!(r.nattrs(), 3);
        assert_eq!(r.depth(), 0);
        assert_eq!(r.splitp(), 0);
        assert_eq!(r.npages(), 1);
        assert_eq!(r.ntuples(), 0);
        r.close().unwrap();

        let r2 = Relation::open(&name, false).unwrap();
        assert_eq!(r2.nattrs(), 3);
        assert_eq!(r2.chvec()[0], ChoiceVectorEntry { attr: 0, bit: 0 });
        r2.close().unwrap();
    }

    #[test]
    fn insert_single_tuple_and_find_it_primary_page() {
        let name = temp_relation_name();
        Relation::create(&name, 3, 1, 0, "0:0,1:0,2:0").unwrap();
        let mut r = Relation::open(&name, true).unwrap();
        let pid = r.add_to_relation("1,2,3").unwrap();
        assert_eq!(r.ntuples(), 1);
        let page = r.data_file().borrow_mut().get_page(pid).unwrap();
        assert_eq!(page.n_tuples(), 1);
        assert_eq!(page.tuples().next(), Some(b"1,2,3".as_ref()));
        r.close().unwrap();
    }

    #[test]
    fn invariant_npages_equals_power_plus_sp_after_many_inserts() {
        let name = temp_relation_name();
        Relation::create(&name, 3, 1, 0, "0:0,1:0,2:0").unwrap();
        let mut r = Relation::open(&name, true).unwrap();
        for i in 0..200 {
            r.add_to_relation(&format!("{},{},{}", i, i * 2, i * 3)).unwrap();
            assert_eq!(r.npages(), (1u32 << r.depth()) + r.splitp());
            assert!(r.splitp() < (1u32 << r.depth()));
        }
        r.close().unwrap();
    }
}
