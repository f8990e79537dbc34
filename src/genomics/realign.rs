//! Projection of a single read onto a target's reference window.
//!
//! The read's CIGAR is walked once over a working copy of its bases. Deleted
//! reference positions become gap cells, inserted bases are pulled out into a
//! side list anchored on the preceding output cell, and the walk records
//! where the read first enters the repeat core. The result is cut into
//! pre-flank, core and post-flank segments of fixed width.

use std::iter;

use super::{AlignedRead, CigarOpKind};
use crate::util::mean_base_quality;

/// One column of a realigned read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cell {
    /// Aligned base.
    Base(u8),
    /// Inserted base whose column has been opened in every row.
    Inserted(u8),
    /// Inserted base still waiting for its column to be opened.
    Pending(u8),
    /// Reference position absent from the read.
    Gap,
    /// Position outside the read.
    OutOfBounds,
    /// Soft-clipped base.
    SoftClipped,
}

impl Cell {
    /// Report symbol. Inserted bases are lowercase.
    pub fn symbol(self) -> char {
        match self {
            Cell::Base(base) => char::from(base),
            Cell::Inserted(base) | Cell::Pending(base) => char::from(base.to_ascii_lowercase()),
            Cell::Gap => '-',
            Cell::OutOfBounds => 'x',
            Cell::SoftClipped => 'S',
        }
    }

    /// Symbol used when the cell is part of an allele sequence.
    pub fn allele_symbol(self) -> char {
        match self {
            Cell::Inserted(base) | Cell::Pending(base) => char::from(base.to_ascii_uppercase()),
            other => other.symbol(),
        }
    }

    /// Whether the cell is a gap column.
    pub fn is_gap(self) -> bool {
        self == Cell::Gap
    }
}

/// Render cells with report symbols.
pub fn render_cells(cells: &[Cell]) -> String {
    cells.iter().map(|cell| cell.symbol()).collect()
}

/// Render cells as an allele sequence, gaps included.
pub fn render_allele(cells: &[Cell]) -> String {
    cells.iter().map(|cell| cell.allele_symbol()).collect()
}

/// Reasons a read produces no realignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The CIGAR contains a reference skip (`N`).
    SkippedRegion,
    /// Read-consuming CIGAR operations do not cover the sequence exactly.
    LengthMismatch {
        /// Bases consumed by the CIGAR.
        cigar: u32,
        /// Bases in the sequence.
        sequence: usize,
    },
    /// Not enough cells to fill the pre-flank plus one core position.
    TooShort,
}

/// Inserted bases anchored after an output cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    /// Index (over pre ++ core ++ post) of the cell preceding the insertion.
    pub after: usize,
    /// Inserted bases in read order.
    pub bases: Vec<u8>,
}

/// A read projected onto the reference window.
#[derive(Debug, Clone, PartialEq)]
pub struct RealignedRead {
    /// Pre-flank segment, exactly `flank` cells.
    pub pre: Vec<Cell>,
    /// Core segment, exactly `core_len` cells.
    pub core: Vec<Cell>,
    /// Post-flank segment, exactly `flank` cells.
    pub post: Vec<Cell>,
    /// Retained insertions in read order.
    pub insertions: Vec<Insertion>,
    /// Mean probability-correct over the read's base qualities.
    pub avg_quality: f64,
}

impl RealignedRead {
    /// Segments with retained insertions spliced in as pending cells.
    ///
    /// Bases anchored on the last cell of a segment open the following
    /// segment; bases anchored on the last post-flank cell are appended.
    pub fn spliced(&self) -> [Vec<Cell>; 3] {
        let flank = self.pre.len();
        let core_len = self.core.len();
        let mut segments = [self.pre.clone(), self.core.clone(), self.post.clone()];

        // Anchors ascend, so splicing from the back keeps earlier offsets valid.
        for insertion in self.insertions.iter().rev() {
            let target = insertion.after + 1;
            let (segment, offset) = if target < flank {
                (0, target)
            } else if target < flank + core_len {
                (1, target - flank)
            } else {
                (2, target - flank - core_len)
            };
            let cells = &mut segments[segment];
            let offset = offset.min(cells.len());
            cells.splice(
                offset..offset,
                insertion.bases.iter().map(|&base| Cell::Pending(base)),
            );
        }
        segments
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Cell(Cell),
    Extracted,
}

struct Walker {
    before_window: i64,
    before_retention: i64,
    start: Option<usize>,
    cursor: usize,
}

impl Walker {
    fn step_reference(&mut self) {
        if self.before_window > 0 {
            self.before_window -= 1;
            self.before_retention -= 1;
        } else if self.start.is_none() {
            self.start = Some(self.cursor);
        }
    }
}

/// Project `read` onto a window whose core starts at 1-based `window_start`.
pub fn realign_read(
    read: &AlignedRead,
    window_start: u64,
    flank: usize,
    core_len: usize,
) -> Result<RealignedRead, Rejection> {
    if read.cigar.iter().any(|op| op.kind == CigarOpKind::Skip) {
        return Err(Rejection::SkippedRegion);
    }
    let consumed = read.query_length();
    if consumed as usize != read.sequence.len() {
        return Err(Rejection::LengthMismatch {
            cigar: consumed,
            sequence: read.sequence.len(),
        });
    }

    let align_start = read.one_based_start();
    let window_start = window_start as i64;
    let leading_clip = match read.cigar.first() {
        Some(op) if op.kind == CigarOpKind::SoftClip => i64::from(op.len),
        _ => 0,
    };
    let entry_padding = (align_start - leading_clip - window_start).max(0) as usize;

    let mut slots: Vec<Slot> = read
        .sequence
        .iter()
        .map(|&base| Slot::Cell(Cell::Base(base.to_ascii_uppercase())))
        .collect();
    let mut walker = Walker {
        before_window: window_start - align_start,
        before_retention: window_start - align_start - flank as i64,
        start: None,
        cursor: 0,
    };
    let mut anchored: Vec<(Option<usize>, Vec<u8>)> = Vec::new();

    for (index, op) in read.cigar.iter().enumerate() {
        match op.kind {
            CigarOpKind::Match | CigarOpKind::Equal | CigarOpKind::Diff => {
                for _ in 0..op.len {
                    walker.step_reference();
                    walker.cursor += 1;
                }
            }
            CigarOpKind::Insertion => {
                let anchor = walker.cursor.checked_sub(1);
                let mut bases = Vec::with_capacity(op.len as usize);
                for _ in 0..op.len {
                    if let Slot::Cell(Cell::Base(base)) = slots[walker.cursor] {
                        bases.push(base);
                    }
                    slots[walker.cursor] = Slot::Extracted;
                    walker.cursor += 1;
                }
                if walker.before_retention <= 0 {
                    anchored.push((anchor, bases));
                }
            }
            CigarOpKind::Deletion => {
                for _ in 0..op.len {
                    slots.insert(walker.cursor, Slot::Cell(Cell::Gap));
                    walker.before_window -= 1;
                    walker.before_retention -= 1;
                    if walker.before_window < 0 && walker.start.is_none() {
                        walker.start = Some(walker.cursor);
                    }
                    walker.cursor += 1;
                }
            }
            CigarOpKind::Skip => return Err(Rejection::SkippedRegion),
            CigarOpKind::SoftClip => {
                if index == 0 && walker.start.is_none() {
                    walker.before_window += i64::from(op.len);
                    walker.before_retention += i64::from(op.len);
                }
                for _ in 0..op.len {
                    walker.step_reference();
                    slots[walker.cursor] = Slot::Cell(Cell::SoftClipped);
                    walker.cursor += 1;
                }
            }
            CigarOpKind::HardClip => {}
            CigarOpKind::Padding => {
                for _ in 0..op.len {
                    walker.step_reference();
                }
            }
        }
    }

    // A read that ends before the window contributes only flank cells.
    let start = walker.start.unwrap_or(if walker.before_window > 0 {
        slots.len()
    } else {
        0
    });

    let mut cells: Vec<Cell> = Vec::with_capacity(2 * flank + core_len);
    let mut output_index: Vec<Option<usize>> = vec![None; slots.len()];

    let upstream: Vec<usize> = (0..start)
        .rev()
        .filter(|&idx| matches!(slots[idx], Slot::Cell(_)))
        .take(flank)
        .collect();
    cells.extend(iter::repeat(Cell::OutOfBounds).take(flank - upstream.len()));
    for &idx in upstream.iter().rev() {
        if let Slot::Cell(cell) = slots[idx] {
            output_index[idx] = Some(cells.len());
            cells.push(cell);
        }
    }
    cells.extend(iter::repeat(Cell::OutOfBounds).take(entry_padding));

    for (idx, slot) in slots.iter().enumerate().skip(start) {
        if let Slot::Cell(cell) = *slot {
            output_index[idx] = Some(cells.len());
            cells.push(cell);
        }
    }

    if cells.len() < flank + 1 {
        return Err(Rejection::TooShort);
    }

    let total = 2 * flank + core_len;
    let insertions = anchored
        .into_iter()
        .filter_map(|(anchor, bases)| {
            let mut slot = anchor?;
            while matches!(slots[slot], Slot::Extracted) {
                slot = slot.checked_sub(1)?;
            }
            let after = output_index[slot]?;
            (after < total && !bases.is_empty()).then_some(Insertion { after, bases })
        })
        .collect();

    let pre = cells[..flank].to_vec();
    let core_end = (flank + core_len).min(cells.len());
    let mut core = cells[flank..core_end].to_vec();
    let truncated = core.len() < core_len;
    core.resize(core_len, Cell::OutOfBounds);
    let mut post = if truncated {
        Vec::new()
    } else {
        cells[core_end..(core_end + flank).min(cells.len())].to_vec()
    };
    post.resize(flank, Cell::OutOfBounds);

    Ok(RealignedRead {
        pre,
        core,
        post,
        insertions,
        avg_quality: mean_base_quality(&read.qualities),
    })
}
