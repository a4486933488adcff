//! Shared fixtures for unit tests

use crate::network::{
    executable_fn, ConnectionDescription, ConnectionId, Module, ModuleDescription, ModuleId,
    Network, PortAddress, PortDescription, PortId,
};

/// Module with one dynamic scalar input `In` and one scalar output `Out`
pub fn passthrough(name: &str) -> Module {
    let desc = ModuleDescription::new(name)
        .with_input(PortDescription::dynamic_input("In", "Scalar"))
        .with_output(PortDescription::output("Out", "Scalar"));
    Module::new(desc, executable_fn(|_| Ok(())))
}

pub fn add(network: &mut Network, name: &str) -> ModuleId {
    network.add_module(passthrough(name)).unwrap()
}

/// Connect `from.Out` to the next free slot of `to.In`
pub fn link(network: &mut Network, from: &ModuleId, to: &ModuleId) -> ConnectionId {
    let slot = network
        .connections_on_input_port(to, "In")
        .last()
        .map(|c| c.input.port.index + 1)
        .unwrap_or(0);
    network
        .connect(ConnectionDescription::new(
            PortAddress::new(from.clone(), PortId::named("Out")),
            PortAddress::new(to.clone(), PortId::new("In", slot)),
        ))
        .unwrap()
}
