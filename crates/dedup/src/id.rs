use rand::Rng;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 22;

/// A fresh random 22-character base62 id. CORD-19 inputs keep their provided
/// 8-character id instead; everything else gets one of these.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shape() {
        for _ in 0..64 {
            let id = generate_id();
            assert_eq!(id.len(), 22);
            assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_no_immediate_collision() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
