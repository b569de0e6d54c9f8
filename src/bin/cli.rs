use lazy_static::lazy_static;
use repl_rs::{Command, Parameter, Result, Value};
use repl_rs::{Convert, Repl};
use std::collections::HashMap;
use tokio::runtime::Runtime;
use tor_onion_controller::{OnionServiceRequest, OnionServiceVersion, TorController};

lazy_static! {
    static ref RUNTIME: Runtime = Runtime::new().unwrap();
}

#[derive(Default)]
struct Context {
    controller: Option<TorController>,
}

const NOT_CONNECTED: &str = "Error: you must connect first with the 'connect' command";

// Connect and authenticate to the Tor server
fn connect(args: HashMap<String, Value>, context: &mut Context) -> Result<Option<String>> {
    let host_port: String = args.get("host_port").unwrap().convert()?;
    if let Some(controller) = context.controller.take() {
        let _ = RUNTIME.block_on(controller.stop());
    }

    let controller = TorController::new(host_port.clone());
    match RUNTIME.block_on(controller.start()) {
        Ok(()) => {
            context.controller = Some(controller);
            Ok(Some(format!("Connected and authenticated to {}", host_port)))
        }
        Err(error) => {
            let _ = RUNTIME.block_on(controller.stop());
            Ok(Some(format!(
                "Error connecting to {}: {}",
                host_port, error
            )))
        }
    }
}

fn protocol_info(_args: HashMap<String, Value>, context: &mut Context) -> Result<Option<String>> {
    let controller = match &context.controller {
        Some(controller) => controller,
        None => return Ok(Some(NOT_CONNECTED.to_string())),
    };

    match RUNTIME.block_on(controller.protocol_info()) {
        Ok(protocol_info) => Ok(Some(format!(
            "Allowed authentication methods: {}\nCookie file location: {}\nTOR version: {}",
            protocol_info.auth_methods().join(", "),
            protocol_info.cookie_file().display(),
            protocol_info.tor_version(),
        ))),
        Err(error) => Ok(Some(format!("Error getting protocol info: {}", error))),
    }
}

fn add_onion(args: HashMap<String, Value>, context: &mut Context) -> Result<Option<String>> {
    let controller = match &context.controller {
        Some(controller) => controller,
        None => return Ok(Some(NOT_CONNECTED.to_string())),
    };

    let virt_port: u16 = args.get("virt_port").unwrap().convert()?;
    let key_path = args.get("key_path").unwrap().to_string();
    let version = match args
        .get("version")
        .unwrap()
        .to_string()
        .parse::<OnionServiceVersion>()
    {
        Ok(version) => version,
        Err(error) => return Ok(Some(format!("Error parsing version: {}", error))),
    };
    let target_ports = match args.get("target_ports") {
        Some(value) => match value
            .to_string()
            .split(',')
            .map(|port| port.trim().parse::<u16>())
            .collect::<std::result::Result<Vec<u16>, _>>()
        {
            Ok(target_ports) => target_ports,
            Err(error) => return Ok(Some(format!("Error parsing target ports: {}", error))),
        },
        None => Vec::new(),
    };

    let request =
        OnionServiceRequest::new(version, virt_port, key_path).with_target_ports(target_ports);
    match RUNTIME.block_on(controller.add_onion(&request)) {
        Ok(address) => Ok(Some(format!("Onion service available at {}", address))),
        Err(error) => Ok(Some(format!("Error creating onion service: {}", error))),
    }
}

fn stop(_args: HashMap<String, Value>, context: &mut Context) -> Result<Option<String>> {
    match context.controller.take() {
        Some(controller) => match RUNTIME.block_on(controller.stop()) {
            Ok(()) => Ok(Some("Disconnected".to_string())),
            Err(error) => Ok(Some(format!("Error disconnecting: {}", error))),
        },
        None => Ok(Some(NOT_CONNECTED.to_string())),
    }
}

pub fn main() -> Result<()> {
    env_logger::init();
    let mut repl = Repl::new(Context::default())
        .with_name("Tor CLI")
        .with_version("v0.1.0")
        .with_description("Manage onion services on a Tor server from the command line")
        .add_command(
            Command::new("connect", connect)
                .with_parameter(Parameter::new("host_port").set_required(true)?)?
                .with_help("Connect to the Tor control port at the given host and port, and authenticate with SAFECOOKIE"),
        )
        .add_command(Command::new("protocol_info", protocol_info).with_help("Get protocol info"))
        .add_command(
            Command::new("add_onion", add_onion)
                .with_parameter(Parameter::new("virt_port").set_required(true)?)?
                .with_parameter(Parameter::new("key_path").set_required(true)?)?
                .with_parameter(Parameter::new("version").set_default("v3")?)?
                .with_parameter(Parameter::new("target_ports"))?
                .with_help("Create an onion service, or restore it from the key in key_path"),
        )
        .add_command(Command::new("stop", stop).with_help("Close the control connection"));

    repl.run()
}
