use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt::{self, Debug};

use crate::command_class::{self, multi_channel, supported_command_classes, Effect};
use crate::{
    CommandClass, CommandClassId, Context, EndpointId, ErrorKind, EventSink, Frame,
    ManufacturerInfo, MessageClass, NodeId, NodeInfo, Priority, ProtocolInfo, Result,
};

/// How far a node's interview has got. Stages only ever move forwards, apart from
/// [`Node::reset_stage`].
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum NodeStage {
    Empty,
    ProtocolInfo,
    NodeInfo,
    ManufacturerInfo,
    Endpoints,
    DynamicValues,
    Done,
}

impl NodeStage {
    fn successor(self) -> NodeStage {
        match self {
            NodeStage::Empty => NodeStage::ProtocolInfo,
            NodeStage::ProtocolInfo => NodeStage::NodeInfo,
            NodeStage::NodeInfo => NodeStage::ManufacturerInfo,
            NodeStage::ManufacturerInfo => NodeStage::Endpoints,
            NodeStage::Endpoints => NodeStage::DynamicValues,
            NodeStage::DynamicValues | NodeStage::Done => NodeStage::Done,
        }
    }
}

/// One addressable unit of a node, holding a handler per command class it supports.
pub struct Endpoint {
    id: EndpointId,
    node_id: NodeId,
    handlers: BTreeMap<CommandClassId, Box<dyn CommandClass>>,
}

impl Endpoint {
    pub fn new(node_id: NodeId, id: EndpointId) -> Self {
        Self {
            id,
            node_id,
            handlers: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Registers a handler for `command_class`. Returns whether this endpoint now has one; an
    /// existing handler is kept as it is.
    pub fn add_command_class(&mut self, command_class: u8) -> bool {
        let id = match CommandClassId::try_from(command_class) {
            Ok(id) => id,
            Err(_) => return false,
        };
        if self.handlers.contains_key(&id) {
            return true;
        }

        match command_class::instantiate(id, self.node_id, self.id) {
            Some(handler) => {
                debug!(
                    "node {} endpoint {}: registered {}",
                    self.node_id, self.id, id
                );
                self.handlers.insert(id, handler);
                true
            }
            None => false,
        }
    }

    pub fn handler(&self, id: CommandClassId) -> Option<&dyn CommandClass> {
        self.handlers.get(&id).map(|handler| handler.as_ref())
    }

    pub fn command_classes(&self) -> impl Iterator<Item = CommandClassId> + '_ {
        self.handlers.keys().copied()
    }

    fn frames_for(&self, stage: NodeStage) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for handler in self.handlers.values() {
            for frame in handler.stage_frames(stage)? {
                frames.push(multi_channel::encapsulate(frame, self.id)?);
            }
        }
        Ok(frames)
    }

    fn poll_frames(&self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for handler in self.handlers.values() {
            for frame in handler.poll_frames()? {
                frames.push(multi_channel::encapsulate(frame, self.id)?);
            }
        }
        Ok(frames)
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("command_classes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A device on the network, as far as we have discovered it.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    stage: NodeStage,
    protocol_info: Option<ProtocolInfo>,
    node_info: Option<NodeInfo>,
    manufacturer_info: Option<ManufacturerInfo>,
    endpoints: BTreeMap<EndpointId, Endpoint>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(0, Endpoint::new(id, 0));

        Self {
            id,
            stage: NodeStage::Empty,
            protocol_info: None,
            node_info: None,
            manufacturer_info: None,
            endpoints,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn stage(&self) -> NodeStage {
        self.stage
    }

    pub fn protocol_info(&self) -> Option<&ProtocolInfo> {
        self.protocol_info.as_ref()
    }

    pub fn node_info(&self) -> Option<&NodeInfo> {
        self.node_info.as_ref()
    }

    pub fn manufacturer_info(&self) -> Option<&ManufacturerInfo> {
        self.manufacturer_info.as_ref()
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn endpoint_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Dispatches the application command whose command class byte is at `offset` to the handler
    /// on `endpoint`, applies whatever the handler asked for, and returns the frames to send.
    ///
    /// Nothing about the node changes unless the handler succeeds.
    pub fn dispatch(
        &mut self,
        frame: &Frame,
        offset: usize,
        endpoint: EndpointId,
        events: &EventSink,
    ) -> Result<Vec<Frame>> {
        let command_class = frame.command_byte(offset)?;
        let node_id = self.id;
        let stage = self.stage;

        let handlers = &mut self
            .endpoints
            .get_mut(&endpoint)
            .ok_or(ErrorKind::UnknownEndpoint { node_id, endpoint })?
            .handlers;
        let handler = match CommandClassId::try_from(command_class) {
            Ok(id) => handlers.get_mut(&id),
            Err(_) => None,
        }
        .ok_or(ErrorKind::NoHandlerRegistered {
            node_id,
            endpoint,
            command_class,
        })?;

        let mut ctx = Context::new(node_id, endpoint, stage, events);
        handler.handle_incoming(&mut ctx, frame, offset + 1)?;

        self.apply(ctx.into_effects(), frame, events)
    }

    fn apply(
        &mut self,
        effects: Vec<Effect>,
        frame: &Frame,
        events: &EventSink,
    ) -> Result<Vec<Frame>> {
        let mut outbound = Vec::new();
        for effect in effects {
            match effect {
                Effect::AdvanceStage(stage) => self.advance_stage(stage)?,
                Effect::CompleteStage(stage) => self.complete_stage(stage),
                Effect::Forward { endpoint, offset } => {
                    outbound.extend(self.dispatch(frame, offset, endpoint, events)?)
                }
                Effect::AddEndpoint {
                    endpoint,
                    command_classes,
                } => self.add_endpoint(endpoint, &command_classes),
                Effect::Manufacturer(info) => self.manufacturer_info = Some(info),
                Effect::Transmit(frame) => outbound.push(frame),
            }
        }
        Ok(outbound)
    }

    fn add_endpoint(&mut self, id: EndpointId, command_classes: &[u8]) {
        let node_id = self.id;
        let endpoint = self
            .endpoints
            .entry(id)
            .or_insert_with(|| Endpoint::new(node_id, id));
        for &command_class in command_classes {
            endpoint.add_command_class(command_class);
        }
    }

    /// Records the result of an IdentifyNode exchange.
    pub fn apply_protocol_info(&mut self, info: ProtocolInfo) {
        debug!("node {} protocol info: {:?}", self.id, info);
        self.protocol_info = Some(info);
        self.complete_stage(NodeStage::ProtocolInfo);
    }

    /// Records a node information frame and registers a handler on the root endpoint for every
    /// command class the node supports.
    pub fn apply_node_info(&mut self, info: NodeInfo) {
        debug!("node {} node info: {:?}", self.id, info);
        if let Some(root) = self.endpoints.get_mut(&0) {
            for command_class in supported_command_classes(&info.command_classes) {
                if !root.add_command_class(command_class) {
                    debug!(
                        "node {}: no handler for command class {:#04x}",
                        self.id, command_class
                    );
                }
            }
        }
        self.node_info = Some(info);
        self.complete_stage(NodeStage::NodeInfo);
    }

    pub fn advance_stage(&mut self, to: NodeStage) -> Result<()> {
        if to < self.stage {
            return Err(ErrorKind::StageRegression {
                node_id: self.id,
                from: self.stage,
                to,
            }
            .into());
        }
        if to != self.stage {
            debug!("node {}: {:?} -> {:?}", self.id, self.stage, to);
            self.stage = to;
        }
        Ok(())
    }

    /// Moves on from `stage`, if the node is still in it.
    pub fn complete_stage(&mut self, stage: NodeStage) {
        if self.stage == stage {
            let next = self.next_stage(stage);
            debug!("node {}: completed {:?}, now {:?}", self.id, stage, next);
            self.stage = next;
        }
    }

    /// The first stage after `stage` that applies to this node.
    pub fn next_stage(&self, stage: NodeStage) -> NodeStage {
        let mut next = stage.successor();
        while !self.stage_applies(next) {
            next = next.successor();
        }
        next
    }

    fn stage_applies(&self, stage: NodeStage) -> bool {
        let root_has = |id| {
            self.endpoints
                .get(&0)
                .map_or(false, |root| root.handler(id).is_some())
        };

        match stage {
            NodeStage::ManufacturerInfo => root_has(CommandClassId::ManufacturerSpecific),
            NodeStage::Endpoints => root_has(CommandClassId::MultiChannel),
            NodeStage::DynamicValues => self
                .endpoints
                .values()
                .any(|endpoint| {
                    endpoint
                        .poll_frames()
                        .map_or(true, |frames| !frames.is_empty())
                }),
            _ => true,
        }
    }

    /// Starts the interview over.
    pub fn reset_stage(&mut self) {
        debug!("node {}: resetting from {:?}", self.id, self.stage);
        self.stage = NodeStage::Empty;
    }

    /// Frames that move the interview on from the current stage.
    pub fn discovery_frames(&self) -> Result<Vec<Frame>> {
        let frames = match self.stage {
            NodeStage::ProtocolInfo => vec![Frame::request(
                self.id,
                MessageClass::IdentifyNode,
                Priority::High,
                vec![self.id],
            )
            .expecting(MessageClass::IdentifyNode)],
            NodeStage::NodeInfo => vec![Frame::request(
                self.id,
                MessageClass::RequestNodeInfo,
                Priority::High,
                vec![self.id],
            )
            .expecting(MessageClass::ApplicationUpdate)],
            NodeStage::ManufacturerInfo | NodeStage::Endpoints | NodeStage::DynamicValues => {
                let mut frames = Vec::new();
                for endpoint in self.endpoints.values() {
                    frames.extend(endpoint.frames_for(self.stage)?);
                }
                frames
            }
            NodeStage::Empty | NodeStage::Done => Vec::new(),
        };
        Ok(frames)
    }

    /// Get requests for every value on every endpoint.
    pub fn poll_frames(&self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        for endpoint in self.endpoints.values() {
            frames.extend(endpoint.poll_frames()?);
        }
        Ok(frames)
    }

    pub fn get_value_frame(
        &self,
        endpoint: EndpointId,
        command_class: CommandClassId,
    ) -> Result<Frame> {
        let frame = self.basic_commands(endpoint, command_class)?.get_value_frame()?;
        multi_channel::encapsulate(frame, endpoint)
    }

    pub fn set_value_frame(
        &self,
        endpoint: EndpointId,
        command_class: CommandClassId,
        level: i32,
    ) -> Result<Frame> {
        let frame = self
            .basic_commands(endpoint, command_class)?
            .set_value_frame(level)?;
        multi_channel::encapsulate(frame, endpoint)
    }

    fn basic_commands(
        &self,
        endpoint: EndpointId,
        command_class: CommandClassId,
    ) -> Result<&dyn command_class::BasicCommands> {
        let handler = self
            .endpoints
            .get(&endpoint)
            .ok_or(ErrorKind::UnknownEndpoint {
                node_id: self.id,
                endpoint,
            })?
            .handler(command_class);

        handler
            .and_then(|handler| handler.basic_commands())
            .ok_or_else(|| {
                ErrorKind::NoHandlerRegistered {
                    node_id: self.id,
                    endpoint,
                    command_class: u8::from(command_class),
                }
                .into()
            })
    }
}
