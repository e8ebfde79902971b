//! Graph compilation and execution
//!
//! A `Graph` is compiled into a flat list of steps in dependency order.
//! The real-time side only ever sees a finished `CompiledGraph`; rebuilds
//! happen on the control thread and are swapped in atomically.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use mg_core::{EngineProcessTimeInfo, MgResult, Port, Processor, ProcessorId, Transport};

use crate::{EdgeGain, EngineConfig, Graph, Processable};

enum Step {
    /// Clear the port and sum its upstream ports into it
    Gather {
        port: Arc<Port>,
        sources: Vec<(Arc<Port>, Option<EdgeGain>)>,
    },
    Process(Arc<dyn Processor>),
}

/// Topologically ordered snapshot of a graph
pub struct CompiledGraph {
    steps: Vec<Step>,
    ports: Vec<Arc<Port>>,
    processors: Vec<Arc<dyn Processor>>,
}

impl CompiledGraph {
    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            ports: Vec::new(),
            processors: Vec::new(),
        }
    }

    /// Order the graph. Fails with `CycleDetected` on a cyclic graph.
    pub fn compile(graph: &Graph) -> MgResult<Self> {
        let order = graph.topological_order()?;
        let mut compiled = Self::empty();

        for id in order {
            let Some(node) = graph.node(id) else { continue };
            match node.processable() {
                Processable::Port(port) => {
                    let sources: Vec<(Arc<Port>, Option<EdgeGain>)> = node
                        .parents()
                        .iter()
                        .filter_map(|&p| graph.node(p))
                        .filter_map(|n| {
                            let source = n.processable().as_port()?;
                            Some((Arc::clone(source), graph.edge_gain(n.id(), id).cloned()))
                        })
                        .collect();
                    // Output ports without port parents are written by their processor
                    if port.is_input() || !sources.is_empty() {
                        compiled.steps.push(Step::Gather {
                            port: Arc::clone(port),
                            sources,
                        });
                    }
                    compiled.ports.push(Arc::clone(port));
                }
                Processable::Processor(processor) => {
                    compiled.steps.push(Step::Process(Arc::clone(processor)));
                    compiled.processors.push(Arc::clone(processor));
                }
            }
        }
        Ok(compiled)
    }

    /// Allocate buffers for every port and processor
    pub fn prepare(&self, sample_rate: f64, max_block_size: usize) {
        for port in &self.ports {
            port.prepare(max_block_size);
        }
        for processor in &self.processors {
            processor.prepare_for_processing(sample_rate, max_block_size);
        }
    }

    /// Run one block
    pub fn process(&self, time: &EngineProcessTimeInfo) {
        for step in &self.steps {
            match step {
                Step::Gather { port, sources } => {
                    port.clear();
                    for (source, gain) in sources {
                        match gain {
                            Some(gain) => port.accumulate_scaled(source, gain.value()),
                            None => port.accumulate_from(source),
                        }
                    }
                }
                Step::Process(processor) => processor.process_block(time),
            }
        }
    }

    pub fn release(&self) {
        for processor in &self.processors {
            processor.release_resources();
        }
    }

    /// Processors in execution order
    pub fn processor_order(&self) -> Vec<ProcessorId> {
        self.processors.iter().map(|p| p.id()).collect()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Live graph shared with the audio thread
pub struct GraphHandle {
    current: ArcSwap<CompiledGraph>,
    config: EngineConfig,
    generation: AtomicU64,
}

impl GraphHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(CompiledGraph::empty()),
            config,
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of successful swaps so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Build a fresh graph with `build`, compile and prepare it, then swap it in.
    ///
    /// On any failure the previous graph stays live and the error is returned.
    pub fn rebuild<F>(&self, build: F) -> MgResult<Arc<CompiledGraph>>
    where
        F: FnOnce(&mut Graph) -> MgResult<()>,
    {
        let mut graph = Graph::new();
        let compiled = build(&mut graph).and_then(|()| CompiledGraph::compile(&graph));

        match compiled {
            Ok(compiled) => {
                compiled.prepare(self.config.sample_rate.as_f64(), self.config.block_size);
                let compiled = Arc::new(compiled);
                self.current.store(Arc::clone(&compiled));
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                log::info!(
                    "Swapped in graph generation {} ({} nodes, {} edges)",
                    generation,
                    graph.node_count(),
                    graph.edge_count()
                );
                Ok(compiled)
            }
            Err(e) => {
                log::error!("Graph rebuild failed: {}", e);
                log::warn!("Keeping graph generation {} live", self.generation());
                Err(e)
            }
        }
    }

    /// Graph currently used by the audio thread
    pub fn current(&self) -> Arc<CompiledGraph> {
        self.current.load_full()
    }

    /// Process one block of the live graph at the transport position
    pub fn process_block(&self, transport: &Transport, nframes: u32) {
        let time = transport.next_block(nframes);
        self.current.load().process(&time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_core::MgError;

    #[test]
    fn test_failed_rebuild_keeps_previous_graph() {
        let handle = GraphHandle::new(EngineConfig::default());
        let first = handle.rebuild(|_| Ok(())).unwrap();
        assert_eq!(handle.generation(), 1);

        let result = handle.rebuild(|_| Err(MgError::InvalidArgument("boom".into())));
        assert!(result.is_err());
        assert_eq!(handle.generation(), 1);
        assert!(Arc::ptr_eq(&handle.current(), &first));
    }

    #[test]
    fn test_empty_graph_processes() {
        let handle = GraphHandle::new(EngineConfig::low_latency());
        let transport = Transport::new();
        transport.play();
        handle.process_block(&transport, 64);
        assert_eq!(transport.position(), 64);
        assert!(handle.current().is_empty());
    }
}
