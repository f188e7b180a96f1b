use anyhow::Context;

pub(crate) struct Args {
    pub config: Option<String>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub screen: Option<u32>,
    pub fps: Option<u32>,
    pub stun: Option<String>,
    pub encoder: Option<String>,
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut bind = None;
    let mut port = None;
    let mut screen = None;
    let mut fps = None;
    let mut stun = None;
    let mut encoder = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("remote-screen-agent {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("remote-screen-agent - headless screen-streaming agent");
                println!();
                println!("USAGE:");
                println!("    remote-screen-agent [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --config <PATH>          TOML config file");
                println!("    --bind <ADDR>            HTTP bind address [default: 0.0.0.0]");
                println!("    --port <PORT>            HTTP port [default: 8443]");
                println!("    --screen <INDEX>         Default screen index [default: 0]");
                println!("    --fps <FPS>              Default frame rate [default: 20]");
                println!("    --stun <URL>             STUN server URL");
                println!("    --encoder <NAME>         Force encoder (h264, vp8)");
                println!("    -V, --version            Print version and exit");
                println!("    -h, --help               Print this help and exit");
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                config = Some(args.get(i).context("missing --config value")?.clone());
            }
            "--bind" => {
                i += 1;
                bind = Some(args.get(i).context("missing --bind value")?.clone());
            }
            "--port" => {
                i += 1;
                port = Some(
                    args.get(i)
                        .context("missing --port value")?
                        .parse()
                        .context("invalid --port value")?,
                );
            }
            "--screen" => {
                i += 1;
                screen = Some(
                    args.get(i)
                        .context("missing --screen value")?
                        .parse()
                        .context("invalid --screen value")?,
                );
            }
            "--fps" => {
                i += 1;
                fps = Some(
                    args.get(i)
                        .context("missing --fps value")?
                        .parse()
                        .context("invalid --fps value")?,
                );
            }
            "--stun" => {
                i += 1;
                stun = Some(args.get(i).context("missing --stun value")?.clone());
            }
            "--encoder" => {
                i += 1;
                encoder = Some(args.get(i).context("missing --encoder value")?.clone());
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(Args {
        config,
        bind,
        port,
        screen,
        fps,
        stun,
        encoder,
    })
}
