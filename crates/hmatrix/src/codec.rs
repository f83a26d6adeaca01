//! Structure text and binary payload codec
//!
//! The structure of a block is a preorder listing, one node per line:
//!
//! ```text
//! H <grid rows> <grid cols>     followed by its children, row-major
//! D <rows> <cols>
//! LR <rows> <cols> <rank>
//! ```
//!
//! The payload lists leaf data in the same preorder: dense leaves row-major,
//! low-rank leaves `U` then `V`, each row-major, as little-endian `f64` with
//! no framing. Uniform blocks are written as `H` nodes whose coupled
//! children become `LR` leaves `(Q_r · S) · Q_cᵗ`.

use std::fmt;
use std::io::{Read, Write};
use std::iter::{Enumerate, Peekable};
use std::str::Lines;

use hmatrix_linalg::Matrix;

use crate::block::{Block, DenseBlock, HierarchicalBuilder, LowRankBlock, UniformChild};
use crate::error::{HMatrixError, Result};

impl Block {
    /// Preorder structure text of this block
    pub fn structure(&self) -> Result<String> {
        let mut out = String::new();
        write_structure(self, &mut out)?;
        Ok(out)
    }

    /// Write every leaf payload in structure order
    pub fn write_binary<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            Block::Dense(d) => write_f64s(w, d.matrix().as_slice()),
            Block::LowRank(lr) => {
                write_f64s(w, lr.u().as_slice())?;
                write_f64s(w, lr.v().as_slice())
            }
            Block::Hierarchical(h) => {
                for child in h.children() {
                    child.write_binary(w)?;
                }
                Ok(())
            }
            Block::Uniform(u) => {
                let (m, n) = u.grid_shape();
                for i in 0..m {
                    for j in 0..n {
                        u.child_block(i, j)?.write_binary(w)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Fill the leaves of this block from a payload written by
    /// [`Block::write_binary`] for the same structure.
    ///
    /// # Errors
    /// `Io` if the payload ends early; `UnsupportedOperand` for uniform
    /// blocks, which are never produced by parsing a structure.
    pub fn load_binary<R: Read>(&mut self, r: &mut R) -> Result<()> {
        match self {
            Block::Dense(d) => read_f64s_into(r, d.matrix_mut().as_mut_slice()),
            Block::LowRank(lr) => {
                let (nrows, ncols, rank) = (lr.nrows(), lr.ncols(), lr.rank());
                let mut u = Matrix::zeros(nrows, rank);
                let mut v = Matrix::zeros(ncols, rank);
                read_f64s_into(r, u.as_mut_slice())?;
                read_f64s_into(r, v.as_mut_slice())?;
                *lr = LowRankBlock::new(u, v)?;
                Ok(())
            }
            Block::Hierarchical(h) => {
                for child in h.children_mut() {
                    child.load_binary(r)?;
                }
                Ok(())
            }
            Block::Uniform(_) => Err(HMatrixError::UnsupportedOperand {
                op: "load_binary",
                kind: self.kind(),
            }),
        }
    }
}

fn write_structure(block: &Block, out: &mut String) -> Result<()> {
    match block {
        Block::Dense(d) => out.push_str(&format!("D {} {}\n", d.nrows(), d.ncols())),
        Block::LowRank(lr) => out.push_str(&format!("LR {} {} {}\n", lr.nrows(), lr.ncols(), lr.rank())),
        Block::Hierarchical(h) => {
            let (m, n) = h.grid_shape();
            out.push_str(&format!("H {} {}\n", m, n));
            for child in h.children() {
                write_structure(child, out)?;
            }
        }
        Block::Uniform(u) => {
            let (m, n) = u.grid_shape();
            out.push_str(&format!("H {} {}\n", m, n));
            for i in 0..m {
                for j in 0..n {
                    write_structure(&*u.child_block(i, j)?, out)?;
                }
            }
        }
    }
    Ok(())
}

fn write_f64s<W: Write>(w: &mut W, values: &[f64]) -> Result<()> {
    for x in values {
        w.write_all(&x.to_le_bytes())?;
    }
    Ok(())
}

fn read_f64s_into<R: Read>(r: &mut R, out: &mut [f64]) -> Result<()> {
    let mut buf = vec![0u8; out.len() * 8];
    r.read_exact(&mut buf)?;
    for (x, chunk) in out.iter_mut().zip(buf.chunks_exact(8)) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        *x = f64::from_le_bytes(bytes);
    }
    Ok(())
}

/// Non-blank structure lines with 1-based line numbers
struct StructureLines<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
    last: usize,
    total: usize,
}

impl<'a> StructureLines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate().peekable(),
            last: 0,
            total: text.lines().count(),
        }
    }

    /// Lines not yet consumed, blank ones included
    fn remaining(&self) -> usize {
        self.total - self.last
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        for (idx, line) in self.lines.by_ref() {
            self.last = idx + 1;
            if !line.trim().is_empty() {
                return Some((idx + 1, line));
            }
        }
        None
    }
}

/// Parse structure text into a zero-filled block of that shape.
///
/// # Errors
/// `UnknownBlockTag` for tags other than `D`, `LR` and `H`;
/// `MalformedStructure` for missing or non-numeric fields, empty grids,
/// truncated input or trailing lines.
pub fn parse_structure(text: &str) -> Result<Block> {
    let mut lines = StructureLines::new(text);
    let block = parse_node(&mut lines)?;
    if let Some((line, rest)) = lines.next_line() {
        return Err(HMatrixError::MalformedStructure {
            line,
            message: format!("trailing content {:?}", rest.trim()),
        });
    }
    Ok(block)
}

fn parse_node(lines: &mut StructureLines<'_>) -> Result<Block> {
    let Some((line, text)) = lines.next_line() else {
        return Err(HMatrixError::MalformedStructure {
            line: lines.last + 1,
            message: "unexpected end of structure".to_string(),
        });
    };
    let mut fields = text.split_whitespace();
    let tag = fields.next().unwrap_or_default();
    let mut field = |name: &str| -> Result<usize> {
        let raw = fields.next().ok_or_else(|| HMatrixError::MalformedStructure {
            line,
            message: format!("missing {}", name),
        })?;
        raw.parse().map_err(|_| HMatrixError::MalformedStructure {
            line,
            message: format!("invalid {} {:?}", name, raw),
        })
    };

    let block = match tag {
        "D" => {
            let (r, c) = (field("row count")?, field("column count")?);
            check_extent(r, c, line)?;
            Block::Dense(DenseBlock::zeros(r, c))
        }
        "LR" => {
            let (r, c, k) = (field("row count")?, field("column count")?, field("rank")?);
            if k > r.min(c) {
                return Err(HMatrixError::MalformedStructure {
                    line,
                    message: format!("rank {} exceeds a {}x{} block", k, r, c),
                });
            }
            check_extent(r, k, line)?;
            check_extent(c, k, line)?;
            Block::LowRank(LowRankBlock::new(Matrix::zeros(r, k), Matrix::zeros(c, k))?)
        }
        "H" => {
            let (m, n) = (field("grid rows")?, field("grid columns")?);
            if m == 0 || n == 0 {
                return Err(HMatrixError::MalformedStructure {
                    line,
                    message: format!("empty {}x{} grid", m, n),
                });
            }
            check_no_extra(fields, line)?;
            let Some(count) = m.checked_mul(n) else {
                return Err(HMatrixError::MalformedStructure {
                    line,
                    message: format!("{}x{} grid overflows", m, n),
                });
            };
            if count > lines.remaining() {
                return Err(HMatrixError::MalformedStructure {
                    line: lines.total + 1,
                    message: "unexpected end of structure".to_string(),
                });
            }
            let mut builder = HierarchicalBuilder::new(m, n);
            for i in 0..m {
                for j in 0..n {
                    builder.set(i, j, parse_node(lines)?)?;
                }
            }
            return Ok(Block::Hierarchical(builder.build()?));
        }
        other => {
            return Err(HMatrixError::UnknownBlockTag {
                line,
                tag: other.to_string(),
            })
        }
    };
    check_no_extra(fields, line)?;
    Ok(block)
}

/// Reject leaf extents whose payload does not fit in memory addressing
fn check_extent(nrows: usize, ncols: usize, line: usize) -> Result<()> {
    let bytes = nrows
        .checked_mul(ncols)
        .and_then(|len| len.checked_mul(std::mem::size_of::<f64>()));
    match bytes {
        Some(b) if b <= isize::MAX as usize => Ok(()),
        _ => Err(HMatrixError::MalformedStructure {
            line,
            message: format!("{}x{} extent overflows", nrows, ncols),
        }),
    }
}

fn check_no_extra<'a>(mut fields: impl Iterator<Item = &'a str>, line: usize) -> Result<()> {
    match fields.next() {
        Some(extra) => Err(HMatrixError::MalformedStructure {
            line,
            message: format!("unexpected field {:?}", extra),
        }),
        None => Ok(()),
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_tree(self, 0, f)
    }
}

fn fmt_tree(block: &Block, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match block {
        Block::Dense(d) => writeln!(f, "{pad}Dense {}x{}", d.nrows(), d.ncols()),
        Block::LowRank(lr) => writeln!(f, "{pad}LowRank {}x{} rank {}", lr.nrows(), lr.ncols(), lr.rank()),
        Block::Hierarchical(h) => {
            let (m, n) = h.grid_shape();
            writeln!(f, "{pad}Hierarchical {}x{} grid {}x{}", h.nrows(), h.ncols(), m, n)?;
            for child in h.children() {
                fmt_tree(child, depth + 1, f)?;
            }
            Ok(())
        }
        Block::Uniform(u) => {
            let (m, n) = u.grid_shape();
            writeln!(f, "{pad}Uniform {}x{} grid {}x{}", u.nrows(), u.ncols(), m, n)?;
            for i in 0..m {
                for j in 0..n {
                    match u.child(i, j).map_err(|_| fmt::Error)? {
                        UniformChild::Coupled(s) => {
                            writeln!(f, "{}  Coupled {}x{}", pad, s.nrows(), s.ncols())?;
                        }
                        UniformChild::Block(b) => fmt_tree(b, depth + 1, f)?,
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_text() {
        let children = vec![
            Block::Dense(DenseBlock::zeros(2, 2)),
            Block::LowRank(LowRankBlock::new(Matrix::zeros(2, 1), Matrix::zeros(3, 1)).unwrap()),
            Block::Dense(DenseBlock::zeros(1, 2)),
            Block::Dense(DenseBlock::zeros(1, 3)),
        ];
        let h = Block::Hierarchical(crate::block::HierarchicalBlock::from_grid(2, 2, children).unwrap());
        assert_eq!(h.structure().unwrap(), "H 2 2\nD 2 2\nLR 2 3 1\nD 1 2\nD 1 3\n");

        let parsed = parse_structure(&h.structure().unwrap()).unwrap();
        assert_eq!(parsed.structure().unwrap(), h.structure().unwrap());
    }

    #[test]
    fn test_payload_layout() {
        let lr = LowRankBlock::new(
            Matrix::from_rows(vec![vec![1.0], vec![2.0]]),
            Matrix::from_rows(vec![vec![3.0]]),
        )
        .unwrap();
        let mut buf = Vec::new();
        Block::LowRank(lr).write_binary(&mut buf).unwrap();
        assert_eq!(buf.len(), 3 * 8);
        assert_eq!(&buf[16..24], &3.0f64.to_le_bytes());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_structure("H 1 1\nX 2 2\n"),
            Err(HMatrixError::UnknownBlockTag { line: 2, .. })
        ));
        assert!(matches!(
            parse_structure("H 2 2\nD 4 4\n"),
            Err(HMatrixError::MalformedStructure { line: 3, .. })
        ));
        assert!(matches!(
            parse_structure("D 4\n"),
            Err(HMatrixError::MalformedStructure { line: 1, .. })
        ));
        assert!(matches!(
            parse_structure("D 4 four\n"),
            Err(HMatrixError::MalformedStructure { .. })
        ));
        assert!(matches!(
            parse_structure("D 4 4\nD 4 4\n"),
            Err(HMatrixError::MalformedStructure { line: 2, .. })
        ));
        assert!(matches!(
            parse_structure("H 0 2\n"),
            Err(HMatrixError::MalformedStructure { .. })
        ));
        assert!(matches!(parse_structure(""), Err(HMatrixError::MalformedStructure { .. })));
    }

    #[test]
    fn test_parse_rejects_oversized_extents() {
        assert!(matches!(
            parse_structure("D 4294967296 4294967297\n"),
            Err(HMatrixError::MalformedStructure { line: 1, .. })
        ));
        assert!(matches!(
            parse_structure("H 1 1\nLR 18446744073709551615 2 2\n"),
            Err(HMatrixError::MalformedStructure { line: 2, .. })
        ));
        assert!(matches!(
            parse_structure("H 4294967296 4294967297\nD 1 1\n"),
            Err(HMatrixError::MalformedStructure { line: 1, .. })
        ));
        assert!(matches!(
            parse_structure("H 65536 65536\nD 1 1\n"),
            Err(HMatrixError::MalformedStructure { line: 3, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_rank_above_extent() {
        assert!(matches!(
            parse_structure("LR 2 2 5\n"),
            Err(HMatrixError::MalformedStructure { line: 1, .. })
        ));
        let lr = parse_structure("LR 2 3 2\n").unwrap();
        assert_eq!(lr.structure().unwrap(), "LR 2 3 2\n");
    }

    #[test]
    fn test_truncated_payload() {
        let mut block = parse_structure("D 2 2\n").unwrap();
        let mut short: &[u8] = &[0u8; 12];
        assert!(matches!(block.load_binary(&mut short), Err(HMatrixError::Io(_))));
    }

    #[test]
    fn test_display_tree() {
        let block = parse_structure("H 1 2\nD 2 2\nLR 2 3 1\n").unwrap();
        let text = block.to_string();
        assert!(text.starts_with("Hierarchical 2x5 grid 1x2\n"));
        assert!(text.contains("  LowRank 2x3 rank 1\n"));
    }
}
