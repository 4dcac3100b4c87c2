//! Shape and stride arithmetic.
//!
//! Shapes are listed outermost axis first. Broadcasting aligns shapes at their innermost axis;
//! an axis of length 1 stretches to any length.

use itertools::{EitherOrBoth, Itertools};

use crate::{Error, Result};

/// Broadcast shape of two shapes.
pub fn broadcast_pair(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let mut out: Vec<usize> = lhs
        .iter()
        .rev()
        .zip_longest(rhs.iter().rev())
        .map(|pair| match pair {
            EitherOrBoth::Both(&a, &b) if a == b || b == 1 => Ok(a),
            EitherOrBoth::Both(&a, &b) if a == 1 => Ok(b),
            EitherOrBoth::Both(_, _) => Err(Error::Broadcast {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
            }),
            EitherOrBoth::Left(&a) | EitherOrBoth::Right(&a) => Ok(a),
        })
        .collect::<Result<_>>()?;
    out.reverse();
    Ok(out)
}

/// Broadcast shape of any number of shapes.
pub fn broadcast_shapes<S: AsRef<[usize]>>(shapes: &[S]) -> Result<Vec<usize>> {
    shapes
        .iter()
        .try_fold(Vec::new(), |acc, s| broadcast_pair(&acc, s.as_ref()))
}

/// Strides that walk an operand of shape `shape` and strides `strides` as if it had shape `target`.
///
/// Missing leading axes and stretched length-1 axes get stride 0.
pub fn broadcast_strides(target: &[usize], shape: &[usize], strides: &[isize]) -> Result<Vec<isize>> {
    if shape.len() > target.len() || shape.len() != strides.len() {
        return Err(Error::Broadcast {
            lhs: target.to_vec(),
            rhs: shape.to_vec(),
        });
    }
    let lead = target.len() - shape.len();
    let mut out = vec![0isize; target.len()];
    for (i, (&n, &s)) in shape.iter().zip(strides).enumerate() {
        let t = target[lead + i];
        out[lead + i] = if n == t {
            s
        } else if n == 1 {
            0
        } else {
            return Err(Error::Broadcast {
                lhs: target.to_vec(),
                rhs: shape.to_vec(),
            });
        };
    }
    Ok(out)
}

/// Row-major strides of a contiguous block.
pub fn contiguous_strides(shape: &[usize], itemsize: usize) -> Vec<isize> {
    let mut strides = vec![0isize; shape.len()];
    let mut acc = itemsize as isize;
    for (s, &n) in strides.iter_mut().zip(shape).rev() {
        *s = acc;
        acc *= n.max(1) as isize;
    }
    strides
}

/// Strides of a block laid out with axis `perm[0]` innermost, `perm[1]` next, and so on.
pub fn strides_with_perm(shape: &[usize], perm: &[usize], itemsize: usize) -> Vec<isize> {
    let mut strides = vec![0isize; shape.len()];
    let mut acc = itemsize as isize;
    for &axis in perm {
        strides[axis] = acc;
        acc *= shape[axis].max(1) as isize;
    }
    strides
}

/// Axis order of a set of operands, innermost first.
///
/// Axes are ordered by ascending absolute stride of operand 0, ties broken by the following
/// operands; fully tied axes keep their row-major order (the last axis innermost).
pub fn axis_perm_from_strides(strides: &[&[isize]]) -> Vec<usize> {
    let ndim = strides.first().map_or(0, |s| s.len());
    (0..ndim)
        .rev()
        .sorted_by_key(|&axis| {
            strides
                .iter()
                .map(|s| s[axis].unsigned_abs())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Total element count of a shape.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasting() -> anyhow::Result<()> {
        assert_eq!(broadcast_pair(&[3, 1, 5], &[1, 4, 5])?, vec![3, 4, 5]);
        assert_eq!(broadcast_pair(&[4, 5], &[3, 1, 1])?, vec![3, 4, 5]);
        assert_eq!(broadcast_pair(&[], &[2])?, vec![2]);
        assert!(broadcast_pair(&[3], &[4]).is_err());
        assert_eq!(broadcast_shapes(&[vec![2, 1], vec![1, 3], vec![3]])?, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn stretched_strides() -> anyhow::Result<()> {
        assert_eq!(broadcast_strides(&[3, 4, 5], &[4, 1], &[8, 4])?, vec![0, 8, 0]);
        assert!(broadcast_strides(&[3], &[2], &[4]).is_err());
        Ok(())
    }

    #[test]
    fn layouts() {
        assert_eq!(contiguous_strides(&[2, 3, 4], 8), vec![96, 32, 8]);
        assert_eq!(strides_with_perm(&[2, 3, 4], &[0, 1, 2], 1), vec![1, 2, 6]);
        assert_eq!(axis_perm_from_strides(&[&[96, 32, 8]]), vec![2, 1, 0]);
        assert_eq!(axis_perm_from_strides(&[&[8, -16]]), vec![0, 1]);
        // tie on operand 0 resolved by operand 1
        assert_eq!(axis_perm_from_strides(&[&[0, 0], &[4, 8]]), vec![0, 1]);
        assert_eq!(axis_perm_from_strides(&[&[0, 0]]), vec![1, 0]);
    }
}
