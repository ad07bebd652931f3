use argh::FromArgs;
use sentryflow::datatypes::{RouteEntry, RouteStrategy};
use sentryflow::{Server, selftest};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use tracing::{Level, error, warn};
use tracing_subscriber::FmtSubscriber;

/// One route supplied on the command line as
/// `"<prefix> <maskBits> <nextHop> <metric>"`.
#[derive(Debug)]
struct RouteSpec {
    prefix: Ipv4Addr,
    mask_bits: u8,
    next_hop: Ipv4Addr,
    metric: u16,
}

impl FromStr for RouteSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [prefix, mask_bits, next_hop, metric] = fields.as_slice() else {
            return Err("expected \"<prefix> <maskBits> <nextHop> <metric>\"".to_string());
        };

        let prefix: Ipv4Addr = prefix.parse().map_err(|_| "invalid route prefix")?;
        let next_hop: Ipv4Addr = next_hop.parse().map_err(|_| "invalid route next hop")?;
        let mask_bits: u8 = mask_bits.parse().map_err(|_| "invalid route mask")?;
        if mask_bits > 32 {
            return Err("invalid route mask".to_string());
        }
        let metric: u16 = metric.parse().map_err(|_| "invalid route metric")?;

        Ok(RouteSpec {
            prefix,
            mask_bits,
            next_hop,
            metric,
        })
    }
}

/// SentryFlow: framed binary request/reply service with an LPM routing table.
#[derive(FromArgs)]
struct CliArgs {
    /// run the built-in self checks and exit
    #[argh(switch)]
    self_test: bool,

    /// address to bind (default: 0.0.0.0)
    #[argh(option, default = "String::from(\"0.0.0.0\")")]
    bind: String,

    /// TCP port to listen on, 1..65535 (default: 9000)
    #[argh(option, default = "9000")]
    port: u16,

    /// routing strategy, direct|hop (default: direct)
    #[argh(option, default = "RouteStrategy::Direct")]
    strategy: RouteStrategy,

    /// seed route "<prefix> <maskBits> <nextHop> <metric>"; repeatable
    #[argh(option)]
    route: Vec<RouteSpec>,

    /// enable debug logging
    #[argh(switch, short = 'd')]
    debug: bool,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let argv: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    let args = match CliArgs::from_args(&arg_refs[..1], &arg_refs[1..]) {
        Ok(args) => args,
        Err(exit) => {
            // Help goes to stdout with success; anything else is an
            // argument parse failure.
            return match exit.status {
                Ok(()) => {
                    println!("{}", exit.output);
                    0
                }
                Err(()) => {
                    eprintln!("{}", exit.output);
                    2
                }
            };
        }
    };

    let level = if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if args.self_test {
        return match selftest::run() {
            Ok(()) => {
                println!("sentryflow self-test: OK");
                0
            }
            Err(err) => {
                eprintln!("self-test failed: {err}");
                1
            }
        };
    }

    if args.port == 0 {
        eprintln!("invalid --port");
        return 2;
    }
    let ip: IpAddr = match args.bind.parse() {
        Ok(ip) => ip,
        Err(_) => {
            eprintln!("invalid --bind address");
            return 2;
        }
    };

    let mut server = match Server::bind(SocketAddr::new(ip, args.port), args.strategy) {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "failed to bind {}:{}", args.bind, args.port);
            return 1;
        }
    };

    for spec in &args.route {
        let entry = RouteEntry {
            prefix: spec.prefix,
            mask_bits: spec.mask_bits,
            metric: spec.metric,
            next_hop: spec.next_hop,
            last_updated_ms: 0,
        };
        if let Err(err) = server.routes_mut().upsert(entry) {
            warn!(%err, "could not seed route {spec:?}");
        }
    }

    match server.run() {
        Ok(()) => 0,
        Err(err) => {
            error!(%err, "event loop failed");
            1
        }
    }
}
