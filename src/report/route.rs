//! Routing of fragments to output categories
//!
//! Routing only depends on the hit flags of the records, the fan-out and the pairing
//! policies. For paired input the categories are:
//!
//! | `num_out` | policy | categories |
//! |---|---|---|
//! | 1 | - | aligned |
//! | 2 | `out2` | forward, reverse |
//! | 2 | `sout` | paired (both mates hit), singleton (one mate hit) |
//! | 4 | `out2` + `sout` | paired forward, paired reverse, singleton forward, singleton reverse |
//!
//! The unaligned report uses the same categories with the complementary selection, so that
//! every record of a fragment ends up in exactly one of the two reports.

use crate::{config::PairPolicy, error::ReportError, record::Record, Result};

/// Category of each record of a pair, `None` when the record is not written
pub type Routes = [Option<usize>; 2];

const SKIP: Routes = [None, None];

/// Checks that two records are mates: same read number, different input files
pub fn validate_pair(records: &[Record]) -> Result<()> {
    let [r0, r1] = records else {
        return Err(ReportError::PairingViolation {
            id0: records.first().map(|r| r.id().to_string()).unwrap_or_default(),
            num0: records.first().map_or(0, Record::read_num),
            file0: records.first().map_or(0, Record::readfile_idx),
            id1: String::new(),
            num1: 0,
            file1: 0,
        }
        .into());
    };
    if r0.read_num() != r1.read_num() || r0.readfile_idx() == r1.readfile_idx() {
        return Err(ReportError::PairingViolation {
            id0: r0.id().to_string(),
            num0: r0.read_num(),
            file0: r0.readfile_idx(),
            id1: r1.id().to_string(),
            num1: r1.read_num(),
            file1: r1.readfile_idx(),
        }
        .into());
    }
    Ok(())
}

fn check_num_out(num_out: usize) -> Result<()> {
    if matches!(num_out, 1 | 2 | 4) {
        Ok(())
    } else {
        Err(ReportError::UnsupportedNumOut(num_out).into())
    }
}

/// Categories of a pair in the aligned report
pub fn route_aligned(hits: [bool; 2], num_out: usize, pairing: &PairPolicy) -> Result<Routes> {
    check_num_out(num_out)?;
    if !hits[0] && !hits[1] {
        return Ok(SKIP);
    }
    let both = hits[0] && hits[1];
    if pairing.paired_out && !both && (num_out == 1 || (pairing.out2 && num_out == 2)) {
        return Ok(SKIP);
    }

    let mut routes = SKIP;
    for (i, route) in routes.iter_mut().enumerate() {
        *route = match num_out {
            1 => (hits[i] || pairing.paired_in).then_some(0),
            2 if pairing.out2 => (hits[i] || pairing.paired_in).then_some(i),
            2 => match (both, hits[i]) {
                (true, _) => Some(0),
                (false, true) => Some(1),
                (false, false) => None,
            },
            _ => match (both, hits[i]) {
                (true, _) => Some(i),
                (false, true) => Some(i + 2),
                (false, false) => None,
            },
        };
    }
    Ok(routes)
}

/// Categories of a pair in the unaligned report
pub fn route_unaligned(hits: [bool; 2], num_out: usize, pairing: &PairPolicy) -> Result<Routes> {
    check_num_out(num_out)?;
    if hits[0] && hits[1] {
        return Ok(SKIP);
    }
    let neither = !hits[0] && !hits[1];

    let mut routes = SKIP;
    for (i, route) in routes.iter_mut().enumerate() {
        *route = match num_out {
            1 | 2 if num_out == 1 || pairing.out2 => {
                let cat = if num_out == 1 { 0 } else { i };
                let written = if pairing.paired_out {
                    true
                } else if pairing.paired_in {
                    neither
                } else {
                    !hits[i]
                };
                written.then_some(cat)
            }
            2 => match (neither, hits[i]) {
                (true, _) => Some(0),
                (false, false) => Some(1),
                (false, true) => None,
            },
            _ => match (neither, hits[i]) {
                (true, _) => Some(i),
                (false, false) => Some(i + 2),
                (false, true) => None,
            },
        };
    }
    Ok(routes)
}
