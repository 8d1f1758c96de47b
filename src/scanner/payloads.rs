//! Protocol-aware UDP payloads keyed by well-known port.
//!
//! Many UDP services drop datagrams that do not parse as their own protocol, so
//! a rescue probe sends the framing a real client would send. Each entry builds
//! a fresh datagram (transaction ids and SPIs are randomised per probe). Ports
//! without an entry get [`GENERIC`].
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub type PayloadBuilder = fn() -> Vec<u8>;

/// A service name and the builder producing its client request.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolPayload {
    pub service: &'static str,
    pub build: PayloadBuilder,
}

/// Fallback for ports with no known protocol. A bare line break draws a reply
/// from most line-oriented services and is ignored by the rest.
pub static GENERIC: ProtocolPayload = ProtocolPayload {
    service: "generic",
    build: generic,
};

static PAYLOADS: Lazy<HashMap<u16, ProtocolPayload>> = Lazy::new(|| {
    let table: [(u16, &'static str, PayloadBuilder); 13] = [
        (53, "dns", dns_query),
        (69, "tftp", tftp_read),
        (123, "ntp", ntp_client),
        (137, "netbios-ns", netbios_node_status),
        (161, "snmp", snmp_get),
        (162, "snmptrap", snmp_get),
        (500, "isakmp", ike_main_mode),
        (1194, "openvpn", openvpn_hard_reset),
        (1701, "l2tp", l2tp_sccrq),
        (1900, "ssdp", ssdp_msearch),
        (4500, "nat-t-ike", ike_nat_traversal),
        (5060, "sip", sip_options),
        (5353, "mdns", mdns_services),
    ];

    table
        .into_iter()
        .map(|(port, service, build)| (port, ProtocolPayload { service, build }))
        .collect()
});

/// Looks up the payload entry for `port`, falling back to [`GENERIC`].
pub fn payload_for(port: u16) -> &'static ProtocolPayload {
    PAYLOADS.get(&port).unwrap_or(&GENERIC)
}

/// Builds the datagram to send to `port`.
pub fn build_payload(port: u16) -> Vec<u8> {
    (payload_for(port).build)()
}


fn generic() -> Vec<u8> {
    b"\r\n\r\n".to_vec()
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn patch_u16(buf: &mut [u8], at: usize, value: usize) {
    let value = u16::try_from(value).unwrap_or(u16::MAX);
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn patch_u32(buf: &mut [u8], at: usize, value: usize) {
    let value = u32::try_from(value).unwrap_or(u32::MAX);
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// Standard query for the root NS set, recursion desired.
fn dns_query() -> Vec<u8> {
    let mut pkt = Vec::with_capacity(17);
    put_u16(&mut pkt, rand::random());
    put_u16(&mut pkt, 0x0100);
    put_u16(&mut pkt, 1);
    pkt.extend_from_slice(&[0; 6]);
    pkt.push(0x00);
    put_u16(&mut pkt, 0x0002);
    put_u16(&mut pkt, 0x0001);
    pkt
}

/// PTR query for `_services._dns-sd._udp.local`, unicast response requested.
fn mdns_services() -> Vec<u8> {
    let mut pkt = Vec::with_capacity(46);
    put_u16(&mut pkt, 0);
    put_u16(&mut pkt, 0);
    put_u16(&mut pkt, 1);
    pkt.extend_from_slice(&[0; 6]);
    for label in ["_services", "_dns-sd", "_udp", "local"] {
        pkt.push(label.len() as u8);
        pkt.extend_from_slice(label.as_bytes());
    }
    pkt.push(0x00);
    put_u16(&mut pkt, 0x000c);
    put_u16(&mut pkt, 0x8001);
    pkt
}

fn tftp_read() -> Vec<u8> {
    let mut pkt = vec![0x00, 0x01];
    pkt.extend_from_slice(b"probe.txt\0octet\0");
    pkt
}

/// 48 byte client request: LI=0, VN=4, Mode=3.
fn ntp_client() -> Vec<u8> {
    let mut pkt = vec![0u8; 48];
    pkt[0] = 0b00_100_011;
    pkt
}

/// NBSTAT query for the wildcard name `*`.
fn netbios_node_status() -> Vec<u8> {
    let mut pkt = Vec::with_capacity(50);
    put_u16(&mut pkt, rand::random());
    put_u16(&mut pkt, 0x0000);
    put_u16(&mut pkt, 1);
    pkt.extend_from_slice(&[0; 6]);
    pkt.push(0x20);
    pkt.extend_from_slice(b"CK");
    pkt.extend_from_slice(&[b'A'; 30]);
    pkt.push(0x00);
    put_u16(&mut pkt, 0x0021);
    put_u16(&mut pkt, 0x0001);
    pkt
}

fn ber_len(len: usize) -> Vec<u8> {
    match len {
        0..=0x7f => vec![len as u8],
        0x80..=0xff => vec![0x81, len as u8],
        _ => {
            let len = u16::try_from(len).unwrap_or(u16::MAX);
            let [hi, lo] = len.to_be_bytes();
            vec![0x82, hi, lo]
        }
    }
}

fn ber_tlv(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(ber_len(body.len()));
    out.extend_from_slice(body);
    out
}

/// SNMPv2c GetRequest for sysDescr.0 with community `public`.
fn snmp_get() -> Vec<u8> {
    const SYS_DESCR: [u8; 8] = [0x2b, 6, 1, 2, 1, 1, 1, 0];

    let request_id: u16 = rand::random::<u16>() & 0x7fff;
    let mut varbind = ber_tlv(0x06, &SYS_DESCR);
    varbind.extend_from_slice(&[0x05, 0x00]);
    let varbind_list = ber_tlv(0x30, &ber_tlv(0x30, &varbind));

    let mut pdu = ber_tlv(0x02, &request_id.to_be_bytes());
    pdu.extend_from_slice(&[0x02, 0x01, 0x00]);
    pdu.extend_from_slice(&[0x02, 0x01, 0x00]);
    pdu.extend(varbind_list);

    let mut message = vec![0x02, 0x01, 0x01];
    message.extend(ber_tlv(0x04, b"public"));
    message.extend(ber_tlv(0xa0, &pdu));
    ber_tlv(0x30, &message)
}

/// IKEv1 main mode initiator message with one SA proposal:
/// 3DES / SHA1 / pre-shared key / MODP1024 / 8h lifetime.
fn ike_main_mode() -> Vec<u8> {
    const ATTRIBUTES: [(u16, u16); 6] = [
        (0x8001, 0x0005),
        (0x8002, 0x0002),
        (0x8003, 0x0001),
        (0x8004, 0x0002),
        (0x800b, 0x0001),
        (0x800c, 0x7080),
    ];

    let mut transform = vec![0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00];
    for (kind, value) in ATTRIBUTES {
        put_u16(&mut transform, kind);
        put_u16(&mut transform, value);
    }
    let transform_len = transform.len();
    patch_u16(&mut transform, 2, transform_len);

    let mut proposal = vec![0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x01];
    proposal.extend(transform);
    let proposal_len = proposal.len();
    patch_u16(&mut proposal, 2, proposal_len);

    let mut sa = vec![0x00, 0x00, 0x00, 0x00];
    put_u32(&mut sa, 1);
    put_u32(&mut sa, 1);
    sa.extend(proposal);
    let sa_len = sa.len();
    patch_u16(&mut sa, 2, sa_len);

    let mut pkt = Vec::with_capacity(28 + sa.len());
    pkt.extend_from_slice(&rand::random::<[u8; 8]>());
    pkt.extend_from_slice(&[0; 8]);
    pkt.extend_from_slice(&[0x01, 0x10, 0x02, 0x00]);
    put_u32(&mut pkt, 0);
    put_u32(&mut pkt, 0);
    pkt.extend(sa);
    let total = pkt.len();
    patch_u32(&mut pkt, 24, total);
    pkt
}

/// IKE over NAT traversal: the same message behind a four byte non-ESP marker.
fn ike_nat_traversal() -> Vec<u8> {
    let mut pkt = vec![0u8; 4];
    pkt.extend(ike_main_mode());
    pkt
}

/// P_CONTROL_HARD_RESET_CLIENT_V2 without tls-auth.
fn openvpn_hard_reset() -> Vec<u8> {
    let mut pkt = vec![0x38];
    pkt.extend_from_slice(&rand::random::<[u8; 8]>());
    pkt.push(0x00);
    put_u32(&mut pkt, 0);
    pkt
}

/// L2TPv2 Start-Control-Connection-Request.
fn l2tp_sccrq() -> Vec<u8> {
    fn avp(buf: &mut Vec<u8>, kind: u16, value: &[u8]) {
        let len = 6 + value.len() as u16;
        put_u16(buf, 0x8000 | len);
        put_u16(buf, 0);
        put_u16(buf, kind);
        buf.extend_from_slice(value);
    }

    let mut pkt = Vec::with_capacity(64);
    put_u16(&mut pkt, 0xc802);
    put_u16(&mut pkt, 0);
    put_u16(&mut pkt, 0);
    put_u16(&mut pkt, 0);
    put_u16(&mut pkt, 0);
    put_u16(&mut pkt, 0);
    avp(&mut pkt, 0, &1u16.to_be_bytes());
    avp(&mut pkt, 2, &[0x01, 0x00]);
    avp(&mut pkt, 3, &3u32.to_be_bytes());
    avp(&mut pkt, 7, b"probe");
    avp(&mut pkt, 9, &rand::random::<u16>().max(1).to_be_bytes());
    let total = pkt.len();
    patch_u16(&mut pkt, 2, total);
    pkt
}

fn ssdp_msearch() -> Vec<u8> {
    b"M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 1\r\n\
ST: ssdp:all\r\n\r\n"
        .to_vec()
}

fn sip_options() -> Vec<u8> {
    let tag: u32 = rand::random();
    format!(
        "OPTIONS sip:probe@invalid SIP/2.0\r\n\
Via: SIP/2.0/UDP 0.0.0.0:5060;branch=z9hG4bK{tag:08x}\r\n\
Max-Forwards: 70\r\n\
To: <sip:probe@invalid>\r\n\
From: <sip:probe@invalid>;tag={tag:08x}\r\n\
Call-ID: {tag:08x}@invalid\r\n\
CSeq: 1 OPTIONS\r\n\
Content-Length: 0\r\n\r\n"
    )
    .into_bytes()
}
