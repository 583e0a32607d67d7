//! Small general-purpose blocks.
//!
//! These cover the boundary cases the engine itself stays agnostic about:
//! constant/arithmetic value sources for wiring up signal paths, and
//! queue-backed message endpoints through which external transports (message
//! brokers, test fixtures) feed payloads into the graph or collect them out
//! of it without the core knowing anything transport-specific.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::block::{Block, BlockError, BlockIo};
use crate::clock::Clock;
use crate::port::{Message, PortSpec};

// ─── Value Blocks ───────────────────────────────────────────────────

/// Emits a fixed sample every cycle.
pub struct Constant {
    value: f64,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl Constant {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            inputs: vec![],
            outputs: vec![PortSpec::value("out")],
        }
    }
}

impl Block for Constant {
    fn name(&self) -> &str {
        "constant"
    }
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }
    fn update(&mut self, io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        io.set_value(0, self.value);
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Multiplies its input by a fixed factor.
pub struct Gain {
    factor: f64,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl Gain {
    pub fn new(factor: f64) -> Self {
        Self {
            factor,
            inputs: vec![PortSpec::value("in")],
            outputs: vec![PortSpec::value("out")],
        }
    }
}

impl Block for Gain {
    fn name(&self) -> &str {
        "gain"
    }
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }
    fn update(&mut self, io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        let v = io.value_in(0);
        io.set_value(0, v * self.factor);
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Sums a fixed number of value inputs.
pub struct Sum {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl Sum {
    pub fn new(arity: usize) -> Self {
        Self {
            inputs: (0..arity)
                .map(|i| PortSpec::value(format!("in{i}")))
                .collect(),
            outputs: vec![PortSpec::value("out")],
        }
    }
}

impl Block for Sum {
    fn name(&self) -> &str {
        "sum"
    }
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }
    fn update(&mut self, io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        let total: f64 = (0..self.inputs.len()).map(|i| io.value_in(i)).sum();
        io.set_value(0, total);
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ─── Message Blocks ─────────────────────────────────────────────────

/// Shared feed queue for a [`MessageSource`].
pub type SourceHandle = Arc<Mutex<VecDeque<Message>>>;

/// Injects externally queued payloads into the graph.
///
/// A transport adapter (or a test) pushes into the shared handle; each cycle
/// the source moves everything queued so far onto its message output.
pub struct MessageSource {
    feed: SourceHandle,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl MessageSource {
    pub fn new() -> Self {
        Self {
            feed: Arc::new(Mutex::new(VecDeque::new())),
            inputs: vec![],
            outputs: vec![PortSpec::message("out")],
        }
    }

    pub fn handle(&self) -> SourceHandle {
        Arc::clone(&self.feed)
    }
}

impl Default for MessageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for MessageSource {
    fn name(&self) -> &str {
        "message_source"
    }
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }
    fn update(&mut self, io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        let mut feed = self
            .feed
            .lock()
            .map_err(|_| BlockError::new("source feed lock poisoned"))?;
        while let Some(msg) = feed.pop_front() {
            io.send_message(0, msg);
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Passes messages through unchanged.
pub struct MessageRelay {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl MessageRelay {
    pub fn new() -> Self {
        Self {
            inputs: vec![PortSpec::message("in")],
            outputs: vec![PortSpec::message("out")],
        }
    }
}

impl Default for MessageRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for MessageRelay {
    fn name(&self) -> &str {
        "message_relay"
    }
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }
    fn update(&mut self, io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        let msgs: Vec<Message> = io.drain_messages(0).collect();
        for msg in msgs {
            io.send_message(0, msg);
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Shared collection bucket for a [`MessageSink`].
pub type SinkHandle = Arc<Mutex<Vec<Message>>>;

/// Drains its message input into a shared bucket an external consumer reads.
pub struct MessageSink {
    bucket: SinkHandle,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl MessageSink {
    pub fn new() -> Self {
        Self {
            bucket: Arc::new(Mutex::new(Vec::new())),
            inputs: vec![PortSpec::message("in")],
            outputs: vec![],
        }
    }

    pub fn handle(&self) -> SinkHandle {
        Arc::clone(&self.bucket)
    }
}

impl Default for MessageSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for MessageSink {
    fn name(&self) -> &str {
        "message_sink"
    }
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }
    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }
    fn update(&mut self, io: &mut BlockIo<'_>, _clock: &Clock) -> Result<(), BlockError> {
        let msgs: Vec<Message> = io.drain_messages(0).collect();
        if msgs.is_empty() {
            return Ok(());
        }
        let mut bucket = self
            .bucket
            .lock()
            .map_err(|_| BlockError::new("sink bucket lock poisoned"))?;
        bucket.extend(msgs);
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickPolicy;
    use crate::exec::Executor;
    use crate::graph::Network;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn constant_feeds_gain() {
        let mut net = Network::new();
        let c = net.add_block(Constant::new(4.0));
        let g = net.add_block(Gain::new(0.5));
        net.connect(c.output(0), g.input(0)).unwrap();

        let order = net.build(&[c]).unwrap();
        let mut exec = Executor::new(order.clone());
        let clock = Clock::new(Duration::from_millis(10), TickPolicy::Nominal);
        exec.run_cycle(&mut net, &clock);

        assert_eq!(net.capture_value_outputs(&order), vec![4.0, 2.0]);
    }

    #[test]
    fn sum_adds_fan_in() {
        let mut net = Network::new();
        let a = net.add_block(Constant::new(1.0));
        let b = net.add_block(Constant::new(2.5));
        let s = net.add_block(Sum::new(2));
        net.connect(a.output(0), s.input(0)).unwrap();
        net.connect(b.output(0), s.input(1)).unwrap();

        let order = net.build(&[s]).unwrap();
        let mut exec = Executor::new(order.clone());
        let clock = Clock::new(Duration::from_millis(10), TickPolicy::Nominal);
        exec.run_cycle(&mut net, &clock);

        let snapshot = net.capture_value_outputs(&order);
        assert_eq!(*snapshot.last().unwrap(), 3.5);
    }

    #[test]
    fn source_drains_feed_in_order() {
        let mut net = Network::new();
        let source = MessageSource::new();
        let feed = source.handle();
        let s = net.add_block(source);
        let sink = MessageSink::new();
        let bucket = sink.handle();
        let k = net.add_block(sink);
        net.connect(s.output(0), k.input(0)).unwrap();

        feed.lock().unwrap().push_back(json!(1));
        feed.lock().unwrap().push_back(json!(2));

        let order = net.build(&[s]).unwrap();
        let mut exec = Executor::new(order);
        let clock = Clock::new(Duration::from_millis(10), TickPolicy::Nominal);
        exec.run_cycle(&mut net, &clock);

        assert_eq!(*bucket.lock().unwrap(), vec![json!(1), json!(2)]);
    }
}
