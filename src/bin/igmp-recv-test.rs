
use igmpd::addr::{ALL_SYSTEMS, ALL_V3_ROUTERS};
use igmpd::igmp::{self, IgmpMessage, RawIgmpSocket};
use igmpd::interface::InterfaceId;
use igmpd::ip::Ipv4Packet;

fn main() -> std::io::Result<()> {
    env_logger::init();
    let socket = RawIgmpSocket::new()?;
    socket.join_multicast(ALL_SYSTEMS.addr(), InterfaceId::UNSPECIFIED)?;
    socket.join_multicast(ALL_V3_ROUTERS.addr(), InterfaceId::UNSPECIFIED)?;
    let mut buf = vec![0u8; 65536];
    loop {
        let len = socket.recv(&mut buf)?;
        let packet = match Ipv4Packet::parse(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                println!("IPv4 <err: {}>", e);
                continue;
            }
        };

        {
            let header = &packet.header;
            print!("{} -> {} (ttl: {}, ra: {})", header.source, header.destination, header.ttl, header.router_alert);
        }

        match igmp::parse(packet.payload()) {
            Ok(parsed) => {
                match parsed {
                    IgmpMessage::MembershipQuery(query) => {
                        print!(" query max_resp_time={} qqi={} {:?}", query.max_resp_time(), query.query_interval(), query);
                    }

                    IgmpMessage::V3MembershipReport(report) => {
                        print!(" {:?}", report);
                    }
                }
            }
            Err(e) => {
                print!(" IGMP <err: {}>", e);
            }
        }
        println!();
    }
}
