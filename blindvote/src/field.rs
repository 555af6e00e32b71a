//! Arithmetic in the multiplicative group of a prime field, plus the few
//! helpers the RSA variant needs over a composite modulus.

use crate::*;
use hkdf::Hkdf;
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use sha2::Sha256;

const FIELD_DOMAIN: &[u8] = b"blindvote/hash-to-field/v1";
const EXPONENT_DOMAIN: &[u8] = b"blindvote/hash-to-exponent/v1";

// Small primes used for trial division ahead of Miller-Rabin
const SMALL_PRIMES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Modular exponentiation: `base^exponent mod modulus`
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    base.modpow(exponent, modulus)
}

/// Inverse of `a` modulo the prime `p`, computed as `a^(p-2) mod p`.
///
/// Fails with [`Error::Arithmetic`] when `a ≡ 0 (mod p)`.
pub fn mod_inverse(a: &BigUint, p: &BigUint) -> Result<BigUint, Error> {
    if *p < BigUint::from(3u32) {
        return Err(Error::Arithmetic(format!("modulus {} is too small", p)));
    }
    let a = a % p;
    if a.is_zero() {
        return Err(Error::Arithmetic("zero has no inverse".to_owned()));
    }
    Ok(a.modpow(&(p - 2u32), p))
}

/// Inverse of `a` modulo an arbitrary (possibly composite) `n`, via the
/// extended Euclidean algorithm.
pub fn ring_inverse(a: &BigUint, n: &BigUint) -> Result<BigUint, Error> {
    if *n <= BigUint::one() {
        return Err(Error::Arithmetic(format!("modulus {} is too small", n)));
    }
    let modulus = BigInt::from(n.clone());
    let (mut old_r, mut r) = (BigInt::from(a % n), modulus.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());

    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return Err(Error::Arithmetic("element is not invertible".to_owned()));
    }
    old_s
        .mod_floor(&modulus)
        .to_biguint()
        .ok_or_else(|| Error::Arithmetic("negative inverse".to_owned()))
}

/// Map an arbitrary message onto a nonzero element of `[1, p-1]`.
///
/// The message is expanded with HKDF-SHA256 to 128 bits more than the modulus
/// before reduction, so the bias of the result is negligible.
pub fn hash_to_field(message: &[u8], p: &BigUint) -> Result<BigUint, Error> {
    if *p < BigUint::from(3u32) {
        return Err(Error::invalid("field modulus must be at least 3"));
    }
    let wide = expand(FIELD_DOMAIN, message, p)?;
    Ok(wide % (p - 1u32) + 1u32)
}

/// Map an arbitrary message onto an exponent in `[0, order)`.
pub fn hash_to_exponent(message: &[u8], order: &BigUint) -> Result<BigUint, Error> {
    if *order < BigUint::from(2u32) {
        return Err(Error::invalid("group order must be at least 2"));
    }
    let wide = expand(EXPONENT_DOMAIN, message, order)?;
    Ok(wide % order)
}

fn expand(domain: &[u8], message: &[u8], modulus: &BigUint) -> Result<BigUint, Error> {
    let len = (modulus.bits() as usize + 7) / 8 + 16;
    let hk = Hkdf::<Sha256>::new(Some(domain), message);
    let mut okm = vec![0u8; len];
    hk.expand(&modulus.to_bytes_be(), &mut okm)
        .map_err(|_| Error::invalid("modulus too large for hash expansion"))?;
    Ok(BigUint::from_bytes_be(&okm))
}

/// Order of the multiplicative group of `Z_p`, i.e. `p - 1`.
///
/// Exponents are reduced modulo this value; it is a multiple of the order of
/// every element, so this is sound whatever subgroup `g` generates.
pub fn group_order(p: &BigUint) -> BigUint {
    p - 1u32
}

/// Miller-Rabin primality test with `rounds` random witnesses.
pub fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    for small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if *n == small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn fermat_inverse() {
        let p = big(9973);
        for a in [1u64, 2, 5, 1234, 9972] {
            let inv = mod_inverse(&big(a), &p).unwrap();
            assert_eq!((big(a) * inv) % &p, big(1));
        }

        // Reduced before inverting
        let inv = mod_inverse(&big(9975), &p).unwrap();
        assert_eq!(inv, mod_inverse(&big(2), &p).unwrap());

        assert!(matches!(mod_inverse(&big(0), &p), Err(Error::Arithmetic(_))));
        assert!(matches!(mod_inverse(&big(9973 * 3), &p), Err(Error::Arithmetic(_))));
    }

    #[test]
    fn euclid_inverse() {
        // 3233 = 61 * 53
        let n = big(3233);
        let inv = ring_inverse(&big(17), &n).unwrap();
        assert_eq!((big(17) * inv) % &n, big(1));

        assert!(ring_inverse(&big(61), &n).is_err());
        assert!(ring_inverse(&big(0), &n).is_err());
        assert!(ring_inverse(&big(5), &big(1)).is_err());
    }

    #[test]
    fn modpow_is_deterministic() {
        let p = big(9973);
        let a = mod_pow(&big(5), &big(1234), &p);
        let b = mod_pow(&big(5), &big(1234), &p);
        assert_eq!(a, b);
        assert_eq!(mod_pow(&big(5), &big(9972), &p), big(1));
    }

    #[test]
    fn hash_to_field_range() {
        let p = big(9973);
        for i in 0..200u32 {
            let h = hash_to_field(&i.to_be_bytes(), &p).unwrap();
            assert!(h >= big(1) && h < p);
        }
        assert_eq!(
            hash_to_field(b"candidate", &p).unwrap(),
            hash_to_field(b"candidate", &p).unwrap()
        );
        assert_ne!(
            hash_to_field(b"candidate-1", &(BigUint::one() << 127u32)).unwrap(),
            hash_to_field(b"candidate-2", &(BigUint::one() << 127u32)).unwrap()
        );
        assert!(hash_to_field(b"x", &big(2)).is_err());
    }

    #[test]
    fn hash_to_exponent_range() {
        let order = big(9972);
        for i in 0..200u32 {
            assert!(hash_to_exponent(&i.to_be_bytes(), &order).unwrap() < order);
        }
        assert!(hash_to_exponent(b"x", &big(1)).is_err());
    }

    #[test]
    fn primality() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for p in [2u64, 3, 37, 41, 9973, 65537, 2_147_483_647] {
            assert!(is_probable_prime(&big(p), 20, &mut rng), "{} is prime", p);
        }
        for c in [0u64, 1, 4, 9, 41 * 43, 9973 * 9967, 561] {
            assert!(!is_probable_prime(&big(c), 20, &mut rng), "{} is composite", c);
        }
    }
}
