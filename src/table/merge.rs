//! Segment lifecycle work: converting frozen writable segments to their
//! compact readonly form, merging runs of readonly segments, and purging
//! logically deleted rows.
//!
//! All three build the replacement segment into a staging directory with
//! no table lock held, then reacquire the write lock only to publish:
//! rename the directory, resync removed bits that arrived during the
//! build, splice the segment list, and rewrite the manifest. Staging
//! directory names (`conv-`, `merge-`, `purge-`) are invisible to the
//! stale-directory sweep; leftovers from a crash are cleared at open.

use std::fs;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use crate::error::Result;
use crate::segment::{
    merge_dir_name, purge_dir_name, remove_dir_logged, ReadonlySegment, Segment,
};

use super::{PurgeStatus, Table};

/// Clears a flag when the lifecycle step finishes, normally or not.
pub(crate) struct FlagGuard<'a>(pub &'a std::sync::atomic::AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }
}

impl Table {
    /// Convert every frozen writable segment into a readonly segment.
    /// Idempotent; run by the flush worker and by `sync_finish_writing`.
    /// Returns the number of segments converted.
    pub fn convert_frozen_segments(self: &Arc<Self>) -> Result<usize> {
        let _serial = self.convert_lock.lock().unwrap();
        let mut converted = 0usize;
        loop {
            if self.tobe_drop.load(AtomicOrdering::SeqCst) {
                break;
            }
            // every writable segment except the trailing one is frozen
            let picked = {
                let st = self.state.read().unwrap();
                let last = st.segments.len().saturating_sub(1);
                st.segments[..last]
                    .iter()
                    .find(|s| s.is_writable())
                    .map(Arc::clone)
            };
            let Some(seg_arc) = picked else { break };

            let wr_name = seg_arc.dir_name();
            let phys = wr_name.trim_start_matches("wr-");
            let staging = self.dir.join(format!("conv-{phys}"));
            let rows = seg_arc.snapshot_rows();
            let row_count = rows.len() as u64;
            let mut new_seg =
                ReadonlySegment::build(staging.clone(), Arc::clone(&self.schema), rows)?;

            {
                let mut st = self.state.write().unwrap();
                let Some(pos) = st.segments.iter().position(|s| Arc::ptr_eq(s, &seg_arc)) else {
                    // segment vanished under us (drop_table); abandon
                    drop(st);
                    remove_dir_logged(&staging);
                    break;
                };
                let final_dir = self.dir.join(wr_name.replacen("wr-", "rd-", 1));
                fs::rename(&staging, &final_dir)?;
                new_seg.set_dir(final_dir);
                // removals that landed while the build ran
                for id in 0..new_seg.num_rows() {
                    if seg_arc.is_removed(id) && !new_seg.is_removed(id) {
                        new_seg.set_removed(id);
                    }
                }
                new_seg.save_delbits()?;
                st.segments[pos] = Arc::new(Segment::Readonly(new_seg));
                self.save_manifest_locked(&st)?;
            }
            converted += 1;
            tracing::info!(segment = %wr_name, rows = row_count, "froze segment to readonly");
            self.cleanup_stale_dirs();
        }
        Ok(converted)
    }

    /// Merge the first run of at least `min_merge_seg_num` consecutive
    /// readonly segments into one. Returns whether a merge happened.
    pub fn run_merge(self: &Arc<Self>) -> Result<bool> {
        let _serial = self.compress_lock.lock().unwrap();
        self.is_merging.store(true, AtomicOrdering::SeqCst);
        let _guard = FlagGuard(&self.is_merging);
        if self.tobe_drop.load(AtomicOrdering::SeqCst) {
            return Ok(false);
        }

        let min_run = self.schema.config.min_merge_seg_num.max(2);
        let inputs: Vec<Arc<Segment>> = {
            let st = self.state.read().unwrap();
            let last = st.segments.len().saturating_sub(1);
            let mut best: Option<(usize, usize)> = None;
            let mut run_start = 0usize;
            let mut run_len = 0usize;
            for (idx, seg) in st.segments[..last].iter().enumerate() {
                if seg.is_writable() {
                    run_len = 0;
                    continue;
                }
                if run_len == 0 {
                    run_start = idx;
                }
                run_len += 1;
                if run_len >= min_run {
                    let better = match best {
                        Some((_, len)) => run_len > len,
                        None => true,
                    };
                    if better {
                        best = Some((run_start, run_len));
                    }
                }
            }
            match best {
                Some((start, len)) => {
                    // bound the rebuild by the working-memory budget,
                    // never below the minimum run
                    let budget = self.schema.config.compressing_work_mem_size;
                    let mut len = len;
                    let mut total: u64 = st.segments[start..start + len]
                        .iter()
                        .map(|s| s.data_storage_size())
                        .sum();
                    while len > min_run && total > budget {
                        len -= 1;
                        total -= st.segments[start + len].data_storage_size();
                    }
                    st.segments[start..start + len]
                        .iter()
                        .map(Arc::clone)
                        .collect()
                }
                None => return Ok(false),
            }
        };

        let seq = self.merge_seq.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let staging = self.dir.join(format!("merge-{seq:04}"));
        // all row slots survive a merge, removed ones included, so the
        // prefix sums of later segments (and every live gid) are stable
        let mut rows = Vec::new();
        for input in &inputs {
            rows.extend(input.snapshot_rows());
        }
        let row_count = rows.len() as u64;
        let mut new_seg = ReadonlySegment::build(staging.clone(), Arc::clone(&self.schema), rows)?;

        {
            let mut st = self.state.write().unwrap();
            let pos = st
                .segments
                .iter()
                .position(|s| Arc::ptr_eq(s, &inputs[0]));
            let contiguous = pos.map_or(false, |p| {
                p + inputs.len() <= st.segments.len()
                    && inputs
                        .iter()
                        .enumerate()
                        .all(|(i, inp)| Arc::ptr_eq(&st.segments[p + i], inp))
            });
            let Some(pos) = pos.filter(|_| contiguous) else {
                drop(st);
                remove_dir_logged(&staging);
                tracing::warn!(merge_seq = seq, "merge inputs changed, abandoning");
                return Ok(false);
            };

            let final_dir = self.dir.join(merge_dir_name(seq));
            fs::rename(&staging, &final_dir)?;
            new_seg.set_dir(final_dir);

            let mut base = 0u64;
            for input in &inputs {
                for id in 0..input.num_rows() {
                    if input.is_removed(id) && !new_seg.is_removed(base + id) {
                        new_seg.set_removed(base + id);
                    }
                }
                base += input.num_rows();
            }
            new_seg.save_delbits()?;

            let merged = Arc::new(Segment::Readonly(new_seg));
            st.segments.splice(pos..pos + inputs.len(), [merged]);
            Self::rebuild_row_num_vec(&mut st);
            self.save_manifest_locked(&st)?;
        }
        tracing::info!(
            merge_seq = seq,
            inputs = inputs.len(),
            rows = row_count,
            "merged readonly segments"
        );
        self.cleanup_stale_dirs();
        Ok(true)
    }

    /// Rewrite the first readonly segment whose removed fraction reaches
    /// the purge threshold, dropping its removed rows. Local ids
    /// renumber, so gids after the purged segment shift down.
    pub fn run_purge_delete(self: &Arc<Self>) -> Result<bool> {
        let _serial = self.compress_lock.lock().unwrap();
        self.purge_status
            .store(PurgeStatus::Purging as u8, AtomicOrdering::SeqCst);
        let done = self.run_purge_delete_inner();
        self.purge_status
            .store(PurgeStatus::None as u8, AtomicOrdering::SeqCst);
        done
    }

    fn run_purge_delete_inner(self: &Arc<Self>) -> Result<bool> {
        if self.tobe_drop.load(AtomicOrdering::SeqCst) {
            return Ok(false);
        }
        let threshold = self.schema.config.purge_delete_threshold;
        let picked = {
            let st = self.state.read().unwrap();
            let last = st.segments.len().saturating_sub(1);
            st.segments[..last]
                .iter()
                .find(|s| {
                    !s.is_writable()
                        && s.num_rows() > 0
                        && s.removed_count() as f64 >= threshold * s.num_rows() as f64
                })
                .map(Arc::clone)
        };
        let Some(seg_arc) = picked else { return Ok(false) };

        let seq = self.merge_seq.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let staging = self.dir.join(format!("purge-{seq:04}"));
        let snapshot = seg_arc.snapshot_rows();
        // live rows renumber densely; remember where each old id went
        let mut old_to_new: Vec<Option<u64>> = Vec::with_capacity(snapshot.len());
        let mut rows = Vec::new();
        for (row, removed) in snapshot {
            if removed {
                old_to_new.push(None);
            } else {
                old_to_new.push(Some(rows.len() as u64));
                rows.push((row, false));
            }
        }
        let purged_rows = rows.len() as u64;
        let mut new_seg = ReadonlySegment::build(staging.clone(), Arc::clone(&self.schema), rows)?;

        {
            let mut st = self.state.write().unwrap();
            let Some(pos) = st.segments.iter().position(|s| Arc::ptr_eq(s, &seg_arc)) else {
                drop(st);
                remove_dir_logged(&staging);
                return Ok(false);
            };
            let final_dir = self.dir.join(purge_dir_name(seq));
            fs::rename(&staging, &final_dir)?;
            new_seg.set_dir(final_dir);
            // rows removed during the build carry over at their new id
            for (old_id, mapped) in old_to_new.iter().enumerate() {
                if let Some(new_id) = mapped {
                    if seg_arc.is_removed(old_id as u64) {
                        new_seg.set_removed(*new_id);
                    }
                }
            }
            new_seg.save_delbits()?;
            st.segments[pos] = Arc::new(Segment::Readonly(new_seg));
            Self::rebuild_row_num_vec(&mut st);
            self.save_manifest_locked(&st)?;
        }
        tracing::info!(
            purge_seq = seq,
            rows = purged_rows,
            "purged removed rows from segment"
        );
        self.cleanup_stale_dirs();
        Ok(true)
    }
}
