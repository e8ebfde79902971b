//! Channel subgraph construction
//!
//! Wires one channel into the project graph in two passes. `add_nodes`
//! registers every processor the channel owns; `add_connections` then
//! runs strictly upstream to downstream:
//!
//! ```text
//! track out -> MIDI FX -> instrument -> inserts -> pre-fader -> fader -> post-fader
//!                                                     |            |
//!                                              pre-fader sends  post-fader sends -> destination
//! ```
//!
//! Processor-to-processor links are made port to port by type. When two
//! processors share no compatible ports an ordering-only node edge is
//! added instead and a warning is logged.

use std::sync::Arc;

use mg_core::{MgError, MgResult, Port, PortId, PortRegistry, PortType, Processor};
use mg_plugin::GroupFader;

use crate::{Channel, ChannelSend, EdgeGain, Graph};

/// Source feeding the next stage of a chain
enum Upstream {
    Port(Arc<Port>),
    /// Plugin output, scaled by the faders of the groups it leaves
    Processor {
        processor: Arc<dyn Processor>,
        faders: Vec<Arc<GroupFader>>,
    },
}

pub struct ChannelSubgraphBuilder;

impl ChannelSubgraphBuilder {
    /// Add nodes for every processor of the channel (and their ports)
    pub fn add_nodes(graph: &mut Graph, channel: &Channel) {
        graph.add_processor(&(Arc::clone(channel.pre_fader()) as Arc<dyn Processor>));
        graph.add_processor(&(Arc::clone(channel.post_fader()) as Arc<dyn Processor>));
        graph.add_processor(&(Arc::clone(channel.fader()) as Arc<dyn Processor>));

        for plugin in channel.plugins() {
            graph.add_processor(&plugin.as_processor());
        }

        for send in channel.sends() {
            graph.add_processor(&(Arc::clone(send) as Arc<dyn Processor>));
        }
        log::debug!("Added channel nodes, graph has {} nodes", graph.node_count());
    }

    /// Wire the channel, fed by `track_output`.
    ///
    /// The node for `track_output` must already be in the graph. Send
    /// destinations are resolved through `ports`, and an edge that would
    /// close a cycle is refused.
    pub fn add_connections(
        graph: &mut Graph,
        ports: &PortRegistry,
        channel: &Channel,
        track_output: PortId,
    ) -> MgResult<()> {
        if graph.find_node_for_processable(track_output).is_none() {
            return Err(MgError::InvalidArgument(format!(
                "track output {} has no node in the graph",
                track_output
            )));
        }
        let track_port = ports.find_by_id_or_err(track_output)?;
        let signal_type = channel.fader().signal_type();

        let prefader: Arc<dyn Processor> = Arc::clone(channel.pre_fader()) as Arc<dyn Processor>;
        let postfader: Arc<dyn Processor> = Arc::clone(channel.post_fader()) as Arc<dyn Processor>;
        let fader: Arc<dyn Processor> = Arc::clone(channel.fader()) as Arc<dyn Processor>;

        // Plugin chain, stage by stage
        let stages = channel.plugin_stages();
        let mut upstream = vec![Upstream::Port(Arc::clone(&track_port))];
        for stage in &stages {
            let mut current = Vec::with_capacity(stage.len());
            for member in stage {
                let processor = Arc::clone(&member.plugin).as_processor();
                graph.add_processor(&processor);
                for source in &upstream {
                    Self::connect_upstream(graph, source, &processor);
                }
                current.push(Upstream::Processor {
                    processor,
                    faders: member.faders.clone(),
                });
            }
            upstream = current;
        }

        // Into the pre-fader
        if stages.is_empty() {
            let input = match signal_type.port_type() {
                PortType::Audio => channel.pre_fader().audio_in_port(),
                PortType::Midi | PortType::Cv => channel.pre_fader().midi_in_port(0),
            };
            match input {
                Some(input) if input.port_type() == track_port.port_type() => {
                    graph.connect_ports(&track_port, input);
                }
                _ => {
                    Self::connect_upstream(graph, &Upstream::Port(Arc::clone(&track_port)), &prefader);
                }
            }
        } else {
            for source in &upstream {
                Self::connect_upstream(graph, source, &prefader);
            }
        }

        graph.add_processor(&prefader);
        graph.add_processor(&postfader);
        graph.add_processor(&fader);

        Self::connect_processors(graph, &prefader, &fader);

        for send in channel.prefader_sends() {
            Self::connect_send(graph, ports, &prefader, send)?;
        }
        for send in channel.postfader_sends() {
            Self::connect_send(graph, ports, &fader, send)?;
        }

        Self::connect_processors(graph, &fader, &postfader);

        log::debug!(
            "Connected {:?} channel: {} plugin stage(s), {} edges total",
            signal_type,
            stages.len(),
            graph.edge_count()
        );
        Ok(())
    }

    /// Connect `from` to `to` port by port.
    ///
    /// Returns the number of port-level connections. With none possible an
    /// ordering-only edge between the processor nodes is added and 0 is
    /// returned.
    pub fn connect_processors(
        graph: &mut Graph,
        from: &Arc<dyn Processor>,
        to: &Arc<dyn Processor>,
    ) -> usize {
        let count = Self::connect_ports_matching(graph, from.output_ports(), to.input_ports());
        if count == 0 {
            log::warn!(
                "No compatible ports between '{}' and '{}', adding ordering-only edge",
                from.name(),
                to.name()
            );
            let a = graph.add_node_for_processable(Arc::clone(from));
            let b = graph.add_node_for_processable(Arc::clone(to));
            graph.connect(a, b);
        }
        count
    }

    /// Pair source outputs with destination inputs, per port type.
    ///
    /// Audio and CV: 1x1 one edge, 1xN fan out to all, Nx1 first output
    /// only, NxM zip over the shorter side. MIDI: the first output goes to
    /// every input.
    pub fn connect_ports_matching(
        graph: &mut Graph,
        outputs: &[Arc<Port>],
        inputs: &[Arc<Port>],
    ) -> usize {
        let of_type = |ports: &[Arc<Port>], t: PortType| -> Vec<Arc<Port>> {
            ports.iter().filter(|p| p.port_type() == t).cloned().collect()
        };

        let mut count = 0;
        for port_type in [PortType::Audio, PortType::Cv] {
            let srcs = of_type(outputs, port_type);
            let dsts = of_type(inputs, port_type);
            match (srcs.len(), dsts.len()) {
                (0, _) | (_, 0) => {}
                (1, _) => {
                    for dst in &dsts {
                        graph.connect_ports(&srcs[0], dst);
                        count += 1;
                    }
                }
                (_, 1) => {
                    graph.connect_ports(&srcs[0], &dsts[0]);
                    count += 1;
                }
                _ => {
                    for (src, dst) in srcs.iter().zip(dsts.iter()) {
                        graph.connect_ports(src, dst);
                        count += 1;
                    }
                }
            }
        }

        let midi_srcs = of_type(outputs, PortType::Midi);
        let midi_dsts = of_type(inputs, PortType::Midi);
        if let Some(first) = midi_srcs.first() {
            for dst in &midi_dsts {
                graph.connect_ports(first, dst);
                count += 1;
            }
        }

        count
    }

    fn connect_upstream(graph: &mut Graph, source: &Upstream, to: &Arc<dyn Processor>) -> usize {
        match source {
            Upstream::Processor { processor, faders } => {
                let count = Self::connect_processors(graph, processor, to);
                if !faders.is_empty() {
                    Self::apply_group_gain(graph, processor, to, faders);
                }
                count
            }
            Upstream::Port(port) => {
                let count =
                    Self::connect_ports_matching(graph, std::slice::from_ref(port), to.input_ports());
                if count == 0 {
                    log::warn!(
                        "Port '{}' has no compatible input on '{}', adding ordering-only edge",
                        port.name(),
                        to.name()
                    );
                    let a = graph.add_node_for_processable(Arc::clone(port));
                    let b = graph.add_node_for_processable(Arc::clone(to));
                    graph.connect(a, b);
                }
                count
            }
        }
    }

    /// Attach `faders` to every port edge between `from` and `to`
    fn apply_group_gain(
        graph: &mut Graph,
        from: &Arc<dyn Processor>,
        to: &Arc<dyn Processor>,
        faders: &[Arc<GroupFader>],
    ) {
        let gain = EdgeGain::new(faders.to_vec());
        for output in from.output_ports() {
            let Some(a) = graph.find_node_for_processable(output.id()) else { continue };
            for input in to.input_ports() {
                if let Some(b) = graph.find_node_for_processable(input.id()) {
                    graph.set_edge_gain(a, b, gain.clone());
                }
            }
        }
    }

    fn connect_send(
        graph: &mut Graph,
        ports: &PortRegistry,
        source: &Arc<dyn Processor>,
        send: &Arc<ChannelSend>,
    ) -> MgResult<()> {
        let send_processor: Arc<dyn Processor> = Arc::clone(send) as Arc<dyn Processor>;
        graph.add_processor(&send_processor);
        Self::connect_processors(graph, source, &send_processor);

        if let Some(destination) = send.destination() {
            let target = ports.find_by_id_or_err(destination)?;
            if !target.is_input() || target.port_type() != send.output_port().port_type() {
                return Err(MgError::InvalidArgument(format!(
                    "'{}' cannot feed {} port '{}'",
                    send.name(),
                    target.port_type(),
                    target.name()
                )));
            }
            let from = graph.add_node_for_processable(Arc::clone(send.output_port()));
            let to = graph.add_node_for_processable(target);
            graph.try_connect(from, to)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_core::{AudioLayout, PortFlow};

    fn audio_ports(n: usize, flow: PortFlow) -> Vec<Arc<Port>> {
        (0..n)
            .map(|i| Arc::new(Port::audio(format!("P{}", i), flow, AudioLayout::Mono)))
            .collect()
    }

    fn cv_ports(n: usize, flow: PortFlow) -> Vec<Arc<Port>> {
        (0..n)
            .map(|i| Arc::new(Port::cv(format!("CV{}", i), flow)))
            .collect()
    }

    fn midi_ports(n: usize, flow: PortFlow) -> Vec<Arc<Port>> {
        (0..n)
            .map(|i| Arc::new(Port::midi(format!("M{}", i), flow)))
            .collect()
    }

    const MATCHING_CASES: [(usize, usize, usize); 7] =
        [(1, 1, 1), (1, 4, 4), (4, 1, 1), (2, 2, 2), (2, 3, 2), (3, 2, 2), (0, 2, 0)];

    #[test]
    fn test_matching_counts() {
        for (n, m, expected) in MATCHING_CASES {
            let mut graph = Graph::new();
            let outs = audio_ports(n, PortFlow::Output);
            let ins = audio_ports(m, PortFlow::Input);
            let count = ChannelSubgraphBuilder::connect_ports_matching(&mut graph, &outs, &ins);
            assert_eq!(count, expected, "{}x{}", n, m);
            assert_eq!(graph.edge_count(), expected);
        }
    }

    #[test]
    fn test_cv_matching_counts() {
        for (n, m, expected) in MATCHING_CASES {
            let mut graph = Graph::new();
            let outs = cv_ports(n, PortFlow::Output);
            let ins = cv_ports(m, PortFlow::Input);
            let count = ChannelSubgraphBuilder::connect_ports_matching(&mut graph, &outs, &ins);
            assert_eq!(count, expected, "CV {}x{}", n, m);
            assert_eq!(graph.edge_count(), expected);
        }

        let mut graph = Graph::new();
        let outs = cv_ports(3, PortFlow::Output);
        let ins = cv_ports(1, PortFlow::Input);
        ChannelSubgraphBuilder::connect_ports_matching(&mut graph, &outs, &ins);
        assert!(graph.is_connected(outs[0].id(), ins[0].id()));
        assert!(!graph.is_connected(outs[2].id(), ins[0].id()));
    }

    #[test]
    fn test_audio_and_cv_match_separately() {
        let mut graph = Graph::new();
        let audio_out = audio_ports(1, PortFlow::Output);
        let cv_out = cv_ports(2, PortFlow::Output);
        let audio_in = audio_ports(2, PortFlow::Input);
        let cv_in = cv_ports(1, PortFlow::Input);
        let outs: Vec<Arc<Port>> = audio_out.iter().chain(cv_out.iter()).cloned().collect();
        let ins: Vec<Arc<Port>> = audio_in.iter().chain(cv_in.iter()).cloned().collect();

        // audio fans out 1x2, CV takes the first of 2x1
        let count = ChannelSubgraphBuilder::connect_ports_matching(&mut graph, &outs, &ins);
        assert_eq!(count, 3);
        assert!(graph.is_connected(audio_out[0].id(), audio_in[1].id()));
        assert!(graph.is_connected(cv_out[0].id(), cv_in[0].id()));
        assert!(!graph.is_connected(audio_out[0].id(), cv_in[0].id()));
        assert!(!graph.is_connected(cv_out[0].id(), audio_in[0].id()));
    }

    #[test]
    fn test_many_to_one_uses_first_output() {
        let mut graph = Graph::new();
        let outs = audio_ports(3, PortFlow::Output);
        let ins = audio_ports(1, PortFlow::Input);
        ChannelSubgraphBuilder::connect_ports_matching(&mut graph, &outs, &ins);
        assert!(graph.is_connected(outs[0].id(), ins[0].id()));
        assert!(!graph.is_connected(outs[1].id(), ins[0].id()));
    }

    #[test]
    fn test_midi_broadcasts_first_output() {
        let mut graph = Graph::new();
        let outs = midi_ports(2, PortFlow::Output);
        let ins = midi_ports(3, PortFlow::Input);
        let count = ChannelSubgraphBuilder::connect_ports_matching(&mut graph, &outs, &ins);
        assert_eq!(count, 3);
        for input in &ins {
            assert!(graph.is_connected(outs[0].id(), input.id()));
            assert!(!graph.is_connected(outs[1].id(), input.id()));
        }
    }

    #[test]
    fn test_types_do_not_mix() {
        let mut graph = Graph::new();
        let outs = midi_ports(1, PortFlow::Output);
        let ins = audio_ports(2, PortFlow::Input);
        assert_eq!(
            ChannelSubgraphBuilder::connect_ports_matching(&mut graph, &outs, &ins),
            0
        );
        assert_eq!(graph.edge_count(), 0);
    }
}
