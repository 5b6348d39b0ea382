use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use wavecast::worker::{ReceiverHandle, SenderHandle};
use wavecast::{Client, Response};

#[derive(Parser)]
#[command(
    name = "wavecast-client",
    about = "Interactive console client for a wavecast server"
)]
struct Args {
    /// Server address (host:port)
    #[arg(long, short, default_value = "127.0.0.1:8554")]
    server: String,
}

const HELP: &str = "\
commands:
  caps                         list server capabilities
  describe                     fetch the media description
  setup <resource>             establish a session for <resource>
  play <output.wav>            stream the resource into <output.wav>
  pause                        pause the stream
  resume                       resume a paused stream
  record <remote> <source>     upload <source> to remote path <remote>
  teardown                     end the session
  quit";

struct Console {
    client: Client,
    host: String,
    resource: Option<String>,
    receiver: Option<ReceiverHandle>,
    sender: Option<SenderHandle>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let client = match Client::connect(&args.server) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", args.server, e);
            return;
        }
    };
    let host = args
        .server
        .split(':')
        .next()
        .unwrap_or(args.server.as_str())
        .to_string();

    println!("connected to {}", args.server);
    println!("{HELP}");

    let mut console = Console {
        client,
        host,
        resource: None,
        receiver: None,
        sender: None,
    };

    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        if !console.run_command(line.trim()) {
            break;
        }
    }

    console.finish();
}

impl Console {
    fn target(&self, resource: &str) -> String {
        format!("rtsp://{}/{}", self.host, resource)
    }

    /// The target of the resource named at SETUP. Commands that need it
    /// before any SETUP fall back to the bare host so the server can
    /// answer with its usual status code.
    fn current_target(&self) -> String {
        match &self.resource {
            Some(resource) => self.target(resource),
            None => self.target(""),
        }
    }

    /// Returns `false` when the console should exit.
    fn run_command(&mut self, line: &str) -> bool {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return true;
        };
        let args: Vec<&str> = words.collect();

        let outcome = match (command, args.as_slice()) {
            ("caps", []) => {
                let target = self.current_target();
                self.client.capabilities(&target).map(|r| {
                    if let Some(public) = &r.public {
                        println!("capabilities: {public}");
                    }
                    r
                })
            }
            ("describe", []) => {
                let target = self.current_target();
                self.client.describe(&target).map(|r| {
                    if let Some(body) = &r.body {
                        println!("{body}");
                    }
                    r
                })
            }
            ("setup", [resource]) => {
                let target = self.target(resource);
                let result = self.client.setup(&target);
                if let Ok(r) = &result {
                    if r.is_ok() {
                        self.resource = Some(resource.to_string());
                        println!("session {}", self.client.session_id().unwrap_or(0));
                    }
                }
                result
            }
            ("play", [output]) => {
                let target = self.current_target();
                match self.client.play(&target, None) {
                    Ok(r) if r.is_ok() => {
                        match self.client.save_stream(PathBuf::from(output)) {
                            Ok(receiver) => {
                                self.receiver = Some(receiver);
                                Ok(r)
                            }
                            Err(e) => Err(e),
                        }
                    }
                    other => other,
                }
            }
            ("pause", []) => {
                let target = self.current_target();
                self.client.pause(&target)
            }
            ("resume", []) => {
                let target = self.current_target();
                self.client.play(&target, None)
            }
            ("record", [remote, source]) => {
                let target = self.target(remote);
                match self.client.record(&target, None) {
                    Ok(r) if r.is_ok() => match self.client.send_audio(PathBuf::from(source)) {
                        Ok(sender) => {
                            self.sender = Some(sender);
                            Ok(r)
                        }
                        Err(e) => Err(e),
                    },
                    other => other,
                }
            }
            ("teardown", []) => {
                self.stop_workers();
                let target = self.current_target();
                let result = self.client.teardown(&target);
                if matches!(&result, Ok(r) if r.is_ok()) {
                    self.resource = None;
                }
                result
            }
            ("quit", []) | ("exit", []) => return false,
            ("help", []) => {
                println!("{HELP}");
                return true;
            }
            _ => {
                println!("unrecognized command (try `help`)");
                return true;
            }
        };

        match outcome {
            Ok(response) => print_status(&response),
            Err(e) => eprintln!("error: {e}"),
        }
        true
    }

    /// Let an in-flight upload finish, then drop both worker handles.
    fn stop_workers(&mut self) {
        if let Some(mut sender) = self.sender.take() {
            sender.wait();
        }
        self.receiver = None;
    }

    fn finish(&mut self) {
        self.stop_workers();
        if self.resource.is_some() {
            let target = self.current_target();
            let _ = self.client.teardown(&target);
        }
    }
}

fn print_status(response: &Response) {
    println!("{} {}", response.code, response.reason);
}
