//! SOCKS5 Protocol Constants

/// Protocol version carried in every handshake, request and reply
pub const SOCKS5_VERSION: u8 = 0x05;

/// Reserved byte in requests and replies
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Command codes (RFC 1928 section 4)
pub mod command {
    pub const CONNECT: u8 = 0x01;
    pub const BIND: u8 = 0x02;
    pub const UDP_ASSOCIATE: u8 = 0x03;
}

/// Address type codes
pub mod atyp {
    pub const IPV4: u8 = 0x01;
    pub const DOMAIN: u8 = 0x03;
    pub const IPV6: u8 = 0x04;
}

/// Authentication method codes
pub mod method {
    pub const NO_AUTH: u8 = 0x00;
    pub const USER_PASS: u8 = 0x02;
    pub const NO_ACCEPTABLE: u8 = 0xFF;
}

/// Reply codes (RFC 1928 section 6)
pub mod reply {
    pub const SUCCEEDED: u8 = 0x00;
    pub const GENERAL_FAILURE: u8 = 0x01;
    pub const NOT_ALLOWED: u8 = 0x02;
    pub const NETWORK_UNREACHABLE: u8 = 0x03;
    pub const HOST_UNREACHABLE: u8 = 0x04;
    pub const CONNECTION_REFUSED: u8 = 0x05;
    pub const TTL_EXPIRED: u8 = 0x06;
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const ADDR_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Username/password sub-negotiation (RFC 1929)
pub mod userpass {
    pub const VERSION: u8 = 0x01;
    pub const SUCCESS: u8 = 0x00;
    pub const FAILURE: u8 = 0x01;
}
