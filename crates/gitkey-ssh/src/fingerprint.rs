// ABOUTME: SSH public key fingerprint computation.
// ABOUTME: SHA256 over the key's wire encoding, printed the way ssh-keygen -l does.

use ssh_key::{HashAlg, PublicKey};

/// OpenSSH-style SHA256 fingerprint of a public key, as `ssh-keygen -l` prints it:
/// `SHA256:<unpadded base64>`.
pub fn compute_fingerprint(public_key: &PublicKey) -> String {
    public_key.fingerprint(HashAlg::Sha256).to_string()
}

/// Fingerprint of a public key given as an OpenSSH text line.
pub fn fingerprint_openssh(line: &str) -> Option<String> {
    let public_key = PublicKey::from_openssh(line.trim()).ok()?;
    Some(compute_fingerprint(&public_key))
}
