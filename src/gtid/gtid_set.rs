//! Interval-compressed GTID sets
//!
//! For every sidno a `GtidSet` keeps a sorted list of disjoint, non-adjacent
//! half-open intervals `[start, end)`. Adjacent or overlapping intervals are
//! coalesced on insert, so two sets with the same members always have the same
//! representation.
//!
//! # Text format
//!
//! `<uuid>:<start>-<end>[:<start>-<end>...][,<uuid>:...]` where `end` is
//! exclusive and a single number `n` stands for `[n, n+1)`. Whitespace around
//! tokens is ignored and the empty string is the empty set. `to_text` orders
//! sources by UUID and prints single-element intervals as a bare number, so
//! parsing and printing canonical text reproduces it exactly.

use super::error::{oom, parse_error, GtidError, GtidResult};
use super::{Gno, Gtid, Sid, SidMap, Sidno, MAX_GNO};

/// Half-open range of GNOs `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub start: Gno,
    pub end: Gno,
}

impl Interval {
    pub const fn new(start: Gno, end: Gno) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, gno: Gno) -> bool {
        self.start <= gno && gno < self.end
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    fn validate(&self) -> GtidResult<()> {
        if self.start < 1 || self.end > MAX_GNO || self.start >= self.end {
            return Err(GtidError::InvalidInterval {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

/// Sorted, disjoint, non-adjacent intervals of a single sidno
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalList {
    intervals: Vec<Interval>,
}

impl IntervalList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.intervals.iter()
    }

    /// Number of GNOs in the list
    pub fn count(&self) -> u64 {
        self.intervals.iter().map(Interval::len).sum()
    }

    pub fn contains(&self, gno: Gno) -> bool {
        let idx = self.intervals.partition_point(|iv| iv.start <= gno);
        idx > 0 && gno < self.intervals[idx - 1].end
    }

    /// Whether `[start, end)` lies entirely inside this list
    pub fn contains_interval(&self, start: Gno, end: Gno) -> bool {
        let idx = self.intervals.partition_point(|iv| iv.start <= start);
        idx > 0 && end <= self.intervals[idx - 1].end
    }

    pub fn add(&mut self, gno: Gno) -> GtidResult<()> {
        self.add_interval(gno, gno.saturating_add(1))
    }

    /// Insert `[start, end)`, merging with any overlapping or adjacent interval
    pub fn add_interval(&mut self, start: Gno, end: Gno) -> GtidResult<()> {
        Interval::new(start, end).validate()?;

        // First interval that overlaps or touches `start`, and one past the last
        // interval that overlaps or touches `end`.
        let lo = self.intervals.partition_point(|iv| iv.end < start);
        let hi = self.intervals.partition_point(|iv| iv.start <= end);

        if lo == hi {
            self.intervals.try_reserve(1).map_err(oom("interval list"))?;
            self.intervals.insert(lo, Interval::new(start, end));
        } else {
            let merged = Interval::new(
                start.min(self.intervals[lo].start),
                end.max(self.intervals[hi - 1].end),
            );
            self.intervals[lo] = merged;
            self.intervals.drain(lo + 1..hi);
        }
        Ok(())
    }

    pub fn remove(&mut self, gno: Gno) -> GtidResult<()> {
        self.remove_interval(gno, gno.saturating_add(1))
    }

    /// Remove `[start, end)`, splitting an interval when the range falls inside it
    pub fn remove_interval(&mut self, start: Gno, end: Gno) -> GtidResult<()> {
        Interval::new(start, end).validate()?;

        let lo = self.intervals.partition_point(|iv| iv.end <= start);
        let hi = self.intervals.partition_point(|iv| iv.start < end);
        if lo >= hi {
            return Ok(());
        }

        let first = self.intervals[lo];
        let last = self.intervals[hi - 1];
        let mut remainder = Vec::new();
        remainder.try_reserve(2).map_err(oom("interval list"))?;
        if first.start < start {
            remainder.push(Interval::new(first.start, start));
        }
        if last.end > end {
            remainder.push(Interval::new(end, last.end));
        }
        self.intervals
            .try_reserve(remainder.len())
            .map_err(oom("interval list"))?;
        self.intervals.splice(lo..hi, remainder);
        Ok(())
    }

    pub fn add_list(&mut self, other: &IntervalList) -> GtidResult<()> {
        for iv in &other.intervals {
            self.add_interval(iv.start, iv.end)?;
        }
        Ok(())
    }

    pub fn remove_list(&mut self, other: &IntervalList) -> GtidResult<()> {
        for iv in &other.intervals {
            self.remove_interval(iv.start, iv.end)?;
        }
        Ok(())
    }

    pub fn is_subset(&self, other: &IntervalList) -> bool {
        self.intervals
            .iter()
            .all(|iv| other.contains_interval(iv.start, iv.end))
    }

    pub fn intersects(&self, other: &IntervalList) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let a = self.intervals[i];
            let b = other.intervals[j];
            if a.start < b.end && b.start < a.end {
                return true;
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        false
    }

    /// Clone, reporting allocation failure instead of aborting
    pub fn try_clone(&self) -> GtidResult<Self> {
        let mut intervals = Vec::new();
        intervals
            .try_reserve_exact(self.intervals.len())
            .map_err(oom("interval list"))?;
        intervals.extend_from_slice(&self.intervals);
        Ok(Self { intervals })
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Every GNO in the list, in increasing order
    pub fn gnos(&self) -> impl Iterator<Item = Gno> + '_ {
        self.intervals.iter().flat_map(|iv| iv.start..iv.end)
    }
}

/// Set of GTIDs, indexed by sidno
#[derive(Debug, Clone, Default)]
pub struct GtidSet {
    /// Index `sidno - 1`
    sidnos: Vec<IntervalList>,
}

impl GtidSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text`, registering unseen source UUIDs in `sid_map`
    pub fn from_text(text: &str, sid_map: &mut SidMap) -> GtidResult<Self> {
        let mut set = Self::new();
        set.add_from_text(text, sid_map)?;
        Ok(set)
    }

    /// Make `sidno` addressable; never disturbs existing intervals
    pub fn ensure_sidno(&mut self, sidno: Sidno) -> GtidResult<()> {
        let wanted = sidno as usize;
        if wanted > self.sidnos.len() {
            self.sidnos
                .try_reserve(wanted - self.sidnos.len())
                .map_err(oom("gtid set"))?;
            self.sidnos.resize_with(wanted, IntervalList::new);
        }
        Ok(())
    }

    /// Highest addressable sidno
    pub fn max_sidno(&self) -> Sidno {
        self.sidnos.len() as Sidno
    }

    fn list(&self, sidno: Sidno) -> Option<&IntervalList> {
        let index = sidno.checked_sub(1)? as usize;
        self.sidnos.get(index)
    }

    fn list_mut(&mut self, sidno: Sidno) -> GtidResult<&mut IntervalList> {
        if sidno == 0 {
            return Err(GtidError::UnknownSidno(sidno));
        }
        self.ensure_sidno(sidno)?;
        Ok(&mut self.sidnos[sidno as usize - 1])
    }

    /// Intervals stored for `sidno` (empty when the sidno is not present)
    pub fn intervals(&self, sidno: Sidno) -> &[Interval] {
        self.list(sidno).map(IntervalList::as_slice).unwrap_or(&[])
    }

    pub fn interval_list(&self, sidno: Sidno) -> Option<&IntervalList> {
        self.list(sidno)
    }

    pub(crate) fn set_interval_list(&mut self, sidno: Sidno, list: IntervalList) -> GtidResult<()> {
        *self.list_mut(sidno)? = list;
        Ok(())
    }

    pub fn contains(&self, sidno: Sidno, gno: Gno) -> bool {
        self.list(sidno).is_some_and(|list| list.contains(gno))
    }

    pub fn contains_gtid(&self, gtid: Gtid) -> bool {
        self.contains(gtid.sidno, gtid.gno)
    }

    pub fn add(&mut self, sidno: Sidno, gno: Gno) -> GtidResult<()> {
        self.add_interval(sidno, gno, gno.saturating_add(1))
    }

    pub fn add_gtid(&mut self, gtid: Gtid) -> GtidResult<()> {
        self.add(gtid.sidno, gtid.gno)
    }

    pub fn add_interval(&mut self, sidno: Sidno, start: Gno, end: Gno) -> GtidResult<()> {
        Interval::new(start, end).validate()?;
        self.list_mut(sidno)?.add_interval(start, end)
    }

    pub fn remove(&mut self, sidno: Sidno, gno: Gno) -> GtidResult<()> {
        self.remove_interval(sidno, gno, gno.saturating_add(1))
    }

    pub fn remove_interval(&mut self, sidno: Sidno, start: Gno, end: Gno) -> GtidResult<()> {
        match sidno.checked_sub(1).and_then(|i| self.sidnos.get_mut(i as usize)) {
            Some(list) => list.remove_interval(start, end),
            None => Interval::new(start, end).validate(),
        }
    }

    /// Union `other` into this set
    pub fn add_gtid_set(&mut self, other: &GtidSet) -> GtidResult<()> {
        self.ensure_sidno(other.max_sidno())?;
        for (index, list) in other.sidnos.iter().enumerate() {
            self.sidnos[index].add_list(list)?;
        }
        Ok(())
    }

    /// Remove every member of `other` from this set
    pub fn remove_gtid_set(&mut self, other: &GtidSet) -> GtidResult<()> {
        for (list, other_list) in self.sidnos.iter_mut().zip(&other.sidnos) {
            list.remove_list(other_list)?;
        }
        Ok(())
    }

    /// Members present in both sets
    pub fn intersection(&self, other: &GtidSet) -> GtidResult<GtidSet> {
        let mut missing = self.clone();
        missing.remove_gtid_set(other)?;
        let mut result = self.clone();
        result.remove_gtid_set(&missing)?;
        Ok(result)
    }

    pub fn is_subset(&self, other: &GtidSet) -> bool {
        self.sidnos.iter().enumerate().all(|(index, list)| {
            list.is_empty()
                || other
                    .sidnos
                    .get(index)
                    .is_some_and(|other_list| list.is_subset(other_list))
        })
    }

    pub fn is_intersection_nonempty(&self, other: &GtidSet) -> bool {
        self.sidnos
            .iter()
            .zip(&other.sidnos)
            .any(|(a, b)| a.intersects(b))
    }

    pub fn is_empty(&self) -> bool {
        self.sidnos.iter().all(IntervalList::is_empty)
    }

    /// Number of GTIDs in the set
    pub fn count(&self) -> u64 {
        self.sidnos.iter().map(IntervalList::count).sum()
    }

    /// Remove every member, keeping the addressable sidno range
    pub fn clear(&mut self) {
        self.sidnos.iter_mut().for_each(IntervalList::clear);
    }

    /// Sidnos that have at least one member, in increasing order
    pub fn sidnos(&self) -> impl Iterator<Item = Sidno> + '_ {
        self.sidnos
            .iter()
            .enumerate()
            .filter(|(_, list)| !list.is_empty())
            .map(|(index, _)| index as Sidno + 1)
    }

    /// All `(sidno, interval)` pairs in increasing order
    pub fn iter_intervals(&self) -> impl Iterator<Item = (Sidno, Interval)> + '_ {
        self.sidnos.iter().enumerate().flat_map(|(index, list)| {
            list.iter().map(move |iv| (index as Sidno + 1, *iv))
        })
    }

    /// All GTIDs in increasing (sidno, gno) order; lazy and restartable
    pub fn iter(&self) -> impl Iterator<Item = Gtid> + '_ {
        self.iter_intervals()
            .flat_map(|(sidno, iv)| (iv.start..iv.end).map(move |gno| Gtid::new(sidno, gno)))
    }

    /// Parse `text` and add its members. On any error the set is left untouched.
    pub fn add_from_text(&mut self, text: &str, sid_map: &mut SidMap) -> GtidResult<()> {
        let entries = parse_entries(text)?;

        let mut staged = self.clone();
        for (sid, intervals) in entries {
            let sidno = sid_map.add(sid)?;
            for iv in intervals {
                staged.add_interval(sidno, iv.start, iv.end)?;
            }
        }
        *self = staged;
        Ok(())
    }

    /// Canonical text form; sources are ordered by UUID
    pub fn to_text(&self, sid_map: &SidMap) -> String {
        let mut out = String::new();
        for sidno in sid_map.sorted_sidnos() {
            let list = match self.list(sidno) {
                Some(list) if !list.is_empty() => list,
                _ => continue,
            };
            let Some(sid) = sid_map.sidno_to_sid(sidno) else {
                continue;
            };
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(&sid.to_string());
            for iv in list.iter() {
                if iv.len() == 1 {
                    out.push_str(&format!(":{}", iv.start));
                } else {
                    out.push_str(&format!(":{}-{}", iv.start, iv.end));
                }
            }
        }
        out
    }
}

impl PartialEq for GtidSet {
    /// Sets are equal when they have the same members, regardless of how many
    /// trailing empty sidnos each one has grown.
    fn eq(&self, other: &Self) -> bool {
        let len = self.sidnos.len().max(other.sidnos.len());
        let empty = IntervalList::new();
        (0..len).all(|i| {
            self.sidnos.get(i).unwrap_or(&empty) == other.sidnos.get(i).unwrap_or(&empty)
        })
    }
}

impl Eq for GtidSet {}

/// Parse GTID set text into per-source interval lists without touching any map
pub(crate) fn parse_entries(text: &str) -> GtidResult<Vec<(Sid, Vec<Interval>)>> {
    let mut entries = Vec::new();
    if text.trim().is_empty() {
        return Ok(entries);
    }

    for entry in text.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(parse_error(text, "empty entry"));
        }

        let mut parts = entry.split(':');
        let sid: Sid = parts.next().unwrap_or_default().parse()?;

        let mut intervals = Vec::new();
        for part in parts {
            intervals.push(parse_interval(text, part.trim())?);
        }
        if intervals.is_empty() {
            return Err(parse_error(text, format!("no intervals for {}", sid)));
        }
        entries.push((sid, intervals));
    }
    Ok(entries)
}

fn parse_interval(text: &str, part: &str) -> GtidResult<Interval> {
    let parse_gno = |s: &str| {
        s.trim()
            .parse::<Gno>()
            .map_err(|_| parse_error(text, format!("invalid GNO '{}'", s.trim())))
    };

    let interval = match part.split_once('-') {
        Some((start, end)) => Interval::new(parse_gno(start)?, parse_gno(end)?),
        None => {
            let gno = parse_gno(part)?;
            Interval::new(gno, gno.saturating_add(1))
        }
    };
    interval
        .validate()
        .map_err(|_| parse_error(text, format!("invalid interval '{}'", part)))?;
    Ok(interval)
}
