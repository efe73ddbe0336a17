//! Fixed-point helpers with 256-bit intermediates.

use std::cmp::Ordering;

use primitive_types::U256;

use crate::error::AuctionError;

/// `floor(a * b / denominator)`, failing if the result exceeds 128 bits.
pub fn mul_div_down(a: u128, b: u128, denominator: u128) -> Result<u128, AuctionError> {
    if denominator == 0 {
        return Err(AuctionError::MathOverflow);
    }
    let product = U256::from(a) * U256::from(b);
    narrow(product / U256::from(denominator))
}

/// `ceil(a * b / denominator)`, failing if the result exceeds 128 bits.
pub fn mul_div_up(a: u128, b: u128, denominator: u128) -> Result<u128, AuctionError> {
    if denominator == 0 {
        return Err(AuctionError::MathOverflow);
    }
    let product = U256::from(a) * U256::from(b);
    let denominator = U256::from(denominator);
    let mut quotient = product / denominator;
    if !(product % denominator).is_zero() {
        quotient += U256::one();
    }
    narrow(quotient)
}

/// Compare the exact ratios `a_num / a_den` and `b_num / b_den`.
///
/// Denominators must be non-zero.
pub fn cmp_ratio(a_num: u128, a_den: u128, b_num: u128, b_den: u128) -> Ordering {
    let lhs = U256::from(a_num) * U256::from(b_den);
    let rhs = U256::from(b_num) * U256::from(a_den);
    lhs.cmp(&rhs)
}

fn narrow(value: U256) -> Result<u128, AuctionError> {
    if value.bits() > 128 {
        return Err(AuctionError::MathOverflow);
    }
    Ok(value.low_u128())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_rounding() {
        assert_eq!(mul_div_down(19, 1_000_000, 9), Ok(2_111_111));
        assert_eq!(mul_div_up(19, 1_000_000, 9), Ok(2_111_112));
        assert_eq!(mul_div_up(4, 1_000_000, 2), Ok(2_000_000));
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        let big = u128::MAX / 3;
        assert_eq!(mul_div_down(big, 6, 6), Ok(big));
        assert_eq!(mul_div_down(big, 6, 2), Err(AuctionError::MathOverflow));
    }

    #[test]
    fn test_mul_div_zero_denominator() {
        assert_eq!(mul_div_down(1, 1, 0), Err(AuctionError::MathOverflow));
        assert_eq!(mul_div_up(1, 1, 0), Err(AuctionError::MathOverflow));
    }

    #[test]
    fn test_cmp_ratio_is_exact() {
        // 19/9 and 2111112/1000000 round to the same price but differ
        assert_eq!(cmp_ratio(19, 9, 2_111_112, 1_000_000), Ordering::Less);
        assert_eq!(cmp_ratio(4, 2, 2, 1), Ordering::Equal);
        assert_eq!(cmp_ratio(5, 2, 2, 1), Ordering::Greater);
    }
}
