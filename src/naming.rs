//! Generated identifiers and addresses
//!
//! Every owned stack gets a freshly generated name so concurrent runs
//! sharing an account and region never collide. The database layer
//! additionally needs a generated cluster name and admin password, and the
//! compute layer a random private IP inside its subnet.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use rand::Rng;

use crate::{Error, Result};

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const LOWERCASE_ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_SPECIALS: &[u8] = b"!$%^()_+";

/// Prefix for generated accounting cluster names
pub const CLUSTER_NAME_PREFIX: &str = "slurm-accounting-";

fn push_choices(rng: &mut impl Rng, alphabet: &[u8], count: usize, out: &mut String) {
    for _ in 0..count {
        let idx = rng.gen_range(0..alphabet.len());
        out.push(alphabet[idx] as char);
    }
}

/// Generate a unique stack name from a semantic prefix and run suffix
///
/// The random component guarantees no collision across concurrent runs that
/// share the same prefix and suffix.
pub fn generate_stack_name(prefix: &str, suffix: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    let mut name = String::from(prefix);
    name.push('-');
    push_choices(&mut rng, LOWERCASE_ALNUM, 8, &mut name);
    if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
        name.push('-');
        name.push_str(suffix);
    }
    name
}

/// Generate an accounting cluster name: fixed prefix + 6 random lowercase
/// alphanumerics
pub fn random_cluster_name() -> String {
    let mut rng = rand::thread_rng();
    let mut name = String::from(CLUSTER_NAME_PREFIX);
    push_choices(&mut rng, LOWERCASE_ALNUM, 6, &mut name);
    name
}

/// Generate a database admin password
///
/// Draws from all four required character classes - 6 uppercase, 4 from the
/// fixed special set, 4 digits, 6 lowercase - concatenated in class order.
pub fn random_admin_password() -> String {
    let mut rng = rand::thread_rng();
    let mut password = String::with_capacity(20);
    push_choices(&mut rng, UPPERCASE, 6, &mut password);
    push_choices(&mut rng, PASSWORD_SPECIALS, 4, &mut password);
    push_choices(&mut rng, DIGITS, 4, &mut password);
    push_choices(&mut rng, LOWERCASE, 6, &mut password);
    password
}

/// Pick a private IP uniformly from the usable host range of a subnet
///
/// The subnet's network and broadcast addresses are excluded. Prefixes
/// longer than /30 have no usable hosts and are rejected.
pub fn random_host_address(subnet: &Ipv4Net) -> Result<Ipv4Addr> {
    let prefix = subnet.prefix_len();
    if prefix > 30 {
        return Err(Error::topology(format!(
            "subnet {subnet} has no usable host addresses"
        )));
    }
    let host_count = 1u64 << (32 - prefix);
    let offset = rand::thread_rng().gen_range(1..host_count - 1) as u32;
    Ok(Ipv4Addr::from(u32::from(subnet.network()) + offset))
}

/// Extract the prefix length from a CIDR string (e.g., "20" from
/// "192.168.32.0/20")
pub fn cidr_prefix_len(cidr: &str) -> Result<&str> {
    cidr.split('/')
        .nth(1)
        .ok_or_else(|| Error::topology(format!("CIDR '{cidr}' has no prefix length")))
}
