use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{error, info, warn};

use groupcomm_service::{
    transport::loopback::LoopbackNetwork, CallOptions, ClusterNode, GroupCommunicationService,
    GroupMembershipListener, Payload, RpcResult, ServiceConfig, ServiceResult,
};

const NODE_NAMES: [&str; 3] = ["node-a", "node-b", "node-c"];

struct LoggingListener {
    node_name: String,
}

impl GroupMembershipListener for LoggingListener {
    fn membership_changed(self: &Self, dead: &[ClusterNode], new: &[ClusterNode], all: &[ClusterNode]) {
        info!(
            "{}: {} members, {} joined, {} left",
            self.node_name,
            all.len(),
            new.len(),
            dead.len()
        );
    }
}

fn main() {
    colog::init();

    // 1st command line arg is the name of the environment
    let args: Vec<String> = env::args().collect();
    let environment = args.get(1).map(String::as_str).unwrap_or("dev");

    let config = match ServiceConfig::load(environment) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load configuration for {environment}: {err}");
            return;
        }
    };

    let stop_signal = Arc::new(AtomicBool::new(false));
    {
        let stop_signal = stop_signal.clone();
        if let Err(err) = ctrlc::set_handler(move || stop_signal.store(true, Ordering::Relaxed)) {
            warn!("Failed to install Ctrl-C handler: {err}");
        }
    }

    let network = LoopbackNetwork::new();
    let services: Vec<GroupCommunicationService> = NODE_NAMES
        .iter()
        .map(|name| build_node(&network, name, &config))
        .collect();

    for service in &services {
        if let Err(err) = service.start() {
            error!("Failed to start: {err}");
            return;
        }
    }

    if let Err(err) = exercise(&services) {
        error!("Demo failed: {err}");
    }

    info!("Running until Ctrl-C");
    while !stop_signal.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    for service in services.iter().rev() {
        service.stop();
        service.destroy();
    }
}

fn build_node(network: &Arc<LoopbackNetwork>, name: &str, config: &ServiceConfig) -> GroupCommunicationService {
    let service = GroupCommunicationService::builder()
        .with_config(config.clone())
        .with_transport_factory(network.factory(name))
        .build();

    let node_name = name.to_owned();
    service.register_rpc_handler(
        "echo",
        Arc::new(move |method_name: &str, args: &Payload| -> RpcResult {
            let text: String = args.decode().unwrap_or_default();
            Ok(Payload::encode(&format!("{node_name} {method_name}: {text}")).ok())
        }),
    );

    let cache = format!("cache of {name}");
    service.register_state_transfer_provider("cache", Arc::new(move || Payload::encode(&cache)));

    service.register_group_membership_listener(Arc::new(LoggingListener {
        node_name: name.to_owned(),
    }));

    service
}

fn exercise(services: &[GroupCommunicationService]) -> ServiceResult<()> {
    let Some(caller) = services.last() else {
        return Ok(());
    };

    let results = caller.call_on_cluster("echo", "say", &Payload::encode("hello")?, None, &CallOptions::new())?;
    for result in results {
        match result {
            Ok(Some(answer)) => info!("Answer: {}", answer.decode::<String>()?),
            Ok(None) => info!("Answer: nothing"),
            Err(failure) => warn!("Failure: {failure}"),
        }
    }

    let transfer = caller.request_state("cache")?.wait();
    match (transfer.state(), transfer.error()) {
        (Some(state), _) => info!("Received state: {}", state.decode::<String>()?),
        (None, Some(err)) => warn!("State transfer failed: {err}"),
        (None, None) => info!("No state to receive"),
    }

    info!("Membership history:\n{}", caller.show_history());
    Ok(())
}
