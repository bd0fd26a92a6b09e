use crate::error::{Error, Result};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Host id of the server inside the overlay /24.
pub const SERVER_HOST_ID: u8 = 1;
/// First and last host ids handed to clients.
pub const FIRST_CLIENT_HOST_ID: u8 = 2;
pub const LAST_CLIENT_HOST_ID: u8 = 254;

/**
 * @brief Address of `host_id` inside the /24 starting at `subnet`.
 */
pub fn host_address(subnet: Ipv4Addr, host_id: u8) -> Ipv4Addr {
    let [a, b, c, _] = subnet.octets();
    Ipv4Addr::new(a, b, c, host_id)
}

/**
 * @brief True when `addr` is a client host address of the /24 starting at `subnet`.
 */
pub fn is_client_address(subnet: Ipv4Addr, addr: Ipv4Addr) -> bool {
    let [a, b, c, d] = addr.octets();
    let [sa, sb, sc, _] = subnet.octets();
    (a, b, c) == (sa, sb, sc) && (FIRST_CLIENT_HOST_ID..=LAST_CLIENT_HOST_ID).contains(&d)
}

/**
 * @brief Lowest free client address in the subnet.
 * @param subnet Network address of the overlay /24.
 * @param used Addresses already assigned.
 * @return First host in .2-.254 not in `used`, or AddressSpaceExhausted.
 */
pub fn allocate(subnet: Ipv4Addr, used: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr> {
    (FIRST_CLIENT_HOST_ID..=LAST_CLIENT_HOST_ID)
        .map(|id| host_address(subnet, id))
        .find(|candidate| !used.contains(candidate))
        .ok_or(Error::AddressSpaceExhausted)
}
