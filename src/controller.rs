use std::collections::BTreeMap;
use std::io::Cursor;

use tokio::sync::mpsc;

use crate::{
    CommandClassId, DecodeError, EndpointId, ErrorKind, EventSink, Frame, MessageClass,
    MessageType, Node, NodeId, NodeInfo, NodeStage, ProtocolInfo, ReadWireExt, Result, ValueEvent,
};

const UPDATE_STATE_NODE_INFO_RECEIVED: u8 = 0x84;
const UPDATE_STATE_NODE_INFO_REQ_FAILED: u8 = 0x81;

/// Owns every node on the network and routes frames between them and the outside world.
///
/// Inbound frames are handed to `handle_frame` (or fed to `run`). Values decoded from them go out
/// on the event bus; frames the nodes want sent go out on the transmit queue, to be scheduled by
/// whoever owns the serial link.
pub struct Controller {
    nodes: BTreeMap<NodeId, Node>,
    events: EventSink,
    transmit: mpsc::UnboundedSender<Frame>,
}

impl Controller {
    pub fn new(
        events: mpsc::UnboundedSender<ValueEvent>,
        transmit: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            nodes: BTreeMap::new(),
            events: EventSink::new(events),
            transmit,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Starts interviewing a node we have not seen before. Known nodes are left alone.
    pub fn add_node(&mut self, id: NodeId) -> Result<&Node> {
        if !self.nodes.contains_key(&id) {
            debug!("adding node {}", id);
            let mut node = Node::new(id);
            node.advance_stage(NodeStage::ProtocolInfo)?;
            let frames = node.discovery_frames()?;

            self.nodes.insert(id, node);
            self.enqueue_all(frames)?;
        }

        self.nodes
            .get(&id)
            .ok_or_else(|| ErrorKind::UnknownNode(id).into())
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        debug!("removing node {}", id);
        self.nodes.remove(&id)
    }

    pub fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match (frame.message_type(), frame.message_class()) {
            (MessageType::Request, MessageClass::ApplicationCommandHandler) => {
                let offset = frame.command_offset()?;
                self.update_node(frame.node_id(), |node, events| {
                    node.dispatch(&frame, offset, 0, events)
                })
            }
            (MessageType::Request, MessageClass::ApplicationUpdate) => {
                self.handle_application_update(&frame)
            }
            (_, message_class) => Err(ErrorKind::UnexpectedMessage(message_class).into()),
        }
    }

    /// Handles the response to an IdentifyNode request sent to `node_id`.
    pub fn handle_protocol_info(&mut self, node_id: NodeId, frame: &Frame) -> Result<()> {
        if frame.message_type() != MessageType::Response
            || frame.message_class() != MessageClass::IdentifyNode
        {
            return Err(ErrorKind::UnexpectedMessage(frame.message_class()).into());
        }

        let info: ProtocolInfo = Cursor::new(frame.payload()).read_wire()?;
        self.update_node(node_id, |node, _| {
            node.apply_protocol_info(info);
            Ok(Vec::new())
        })
    }

    pub fn request_value(
        &mut self,
        node_id: NodeId,
        endpoint: EndpointId,
        command_class: CommandClassId,
    ) -> Result<()> {
        let frame = self.known_node(node_id)?.get_value_frame(endpoint, command_class)?;
        self.enqueue(frame)
    }

    pub fn set_value(
        &mut self,
        node_id: NodeId,
        endpoint: EndpointId,
        command_class: CommandClassId,
        level: i32,
    ) -> Result<()> {
        let frame = self
            .known_node(node_id)?
            .set_value_frame(endpoint, command_class, level)?;
        self.enqueue(frame)
    }

    /// Asks a node for all of its values again.
    pub fn poll(&mut self, node_id: NodeId) -> Result<()> {
        let frames = self.known_node(node_id)?.poll_frames()?;
        self.enqueue_all(frames)
    }

    /// Decodes and handles raw frames until the sender goes away, then hands the controller back.
    ///
    /// Nothing a single frame does stops the loop: failures are logged and the frame dropped.
    pub async fn run(mut self, mut frames: mpsc::Receiver<Vec<u8>>) -> Self {
        while let Some(buffer) = frames.recv().await {
            let frame = match Frame::from_bytes(&buffer) {
                Ok(frame) => frame,
                Err(error) => {
                    error!("controller read frame: {}", error);
                    continue;
                }
            };
            debug!("received = {:?}", frame);

            if let Err(error) = self.handle_frame(frame) {
                if error.is_decode() {
                    error!("controller handle frame: {}", error);
                } else {
                    warn!("controller handle frame: {}", error);
                }
            }
        }

        self
    }

    fn handle_application_update(&mut self, frame: &Frame) -> Result<()> {
        let state = frame.payload_byte(0)?;
        match state {
            UPDATE_STATE_NODE_INFO_RECEIVED => {
                let (node_id, info) = read_node_info(frame)?;
                self.add_node(node_id)?;
                self.update_node(node_id, |node, _| {
                    node.apply_node_info(info);
                    Ok(Vec::new())
                })
            }
            UPDATE_STATE_NODE_INFO_REQ_FAILED => {
                warn!("node info request failed for node {}", frame.node_id());
                Ok(())
            }
            _ => {
                debug!("ignoring application update with state {:#04x}", state);
                Ok(())
            }
        }
    }

    /// Runs `f` against a node, then sends whatever it returned along with the frames its new
    /// stage needs, if the stage moved.
    fn update_node<F>(&mut self, node_id: NodeId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Node, &EventSink) -> Result<Vec<Frame>>,
    {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(ErrorKind::UnknownNode(node_id))?;

        let stage = node.stage();
        let mut frames = f(node, &self.events)?;
        if node.stage() != stage {
            frames.extend(node.discovery_frames()?);
        }

        self.enqueue_all(frames)
    }

    fn known_node(&self, node_id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&node_id)
            .ok_or_else(|| ErrorKind::UnknownNode(node_id).into())
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        debug!("enqueueing = {:?}", frame);
        self.transmit
            .send(frame)
            .map_err(|_| ErrorKind::ChannelError)?;
        Ok(())
    }

    fn enqueue_all(&self, frames: Vec<Frame>) -> Result<()> {
        for frame in frames {
            self.enqueue(frame)?;
        }
        Ok(())
    }
}

/// Reads `[state, node, len, basic, generic, specific, cc...]`.
fn read_node_info(frame: &Frame) -> Result<(NodeId, NodeInfo)> {
    let node_id = frame.payload_byte(1)?;
    let declared = usize::from(frame.payload_byte(2)?);
    let body = frame.payload_from(3)?;
    if declared < 3 || declared > body.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: body.len(),
        }
        .into());
    }

    let mut r = Cursor::new(&body[..declared]);
    let device_class = r.read_wire()?;
    let command_classes = body[3..declared].to_vec();

    Ok((
        node_id,
        NodeInfo {
            device_class,
            command_classes,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceClass, Priority};

    struct Harness {
        controller: Controller,
        events: mpsc::UnboundedReceiver<ValueEvent>,
        transmit: mpsc::UnboundedReceiver<Frame>,
    }

    impl Harness {
        fn new() -> Self {
            let (events_tx, events) = mpsc::unbounded_channel();
            let (transmit_tx, transmit) = mpsc::unbounded_channel();
            Self {
                controller: Controller::new(events_tx, transmit_tx),
                events,
                transmit,
            }
        }

        fn sent(&mut self) -> Vec<Frame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.transmit.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    fn node_info_update(node_id: NodeId, command_classes: &[u8]) -> Frame {
        let mut payload = vec![
            UPDATE_STATE_NODE_INFO_RECEIVED,
            node_id,
            command_classes.len() as u8 + 3,
            0x04,
            0x10,
            0x01,
        ];
        payload.extend_from_slice(command_classes);
        Frame::request(
            node_id,
            MessageClass::ApplicationUpdate,
            Priority::High,
            payload,
        )
    }

    fn identify_response(payload: Vec<u8>) -> Frame {
        let request = Frame::request(0, MessageClass::IdentifyNode, Priority::High, Vec::new());
        let mut bytes = request.to_bytes().unwrap();
        // Turn the request into a response carrying `payload`.
        bytes.truncate(4);
        bytes[2] = 0x01;
        bytes.extend_from_slice(&payload);
        bytes[1] = (payload.len() + 3) as u8;
        let checksum = bytes[1..].iter().fold(0xFF, |acc, b| acc ^ b);
        bytes.push(checksum);
        Frame::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn add_node_starts_interview() {
        let mut harness = Harness::new();

        let node = harness.controller.add_node(4).unwrap();
        assert_eq!(node.stage(), NodeStage::ProtocolInfo);

        let sent = harness.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_class(), MessageClass::IdentifyNode);
        assert_eq!(sent[0].payload(), &[4]);

        harness.controller.add_node(4).unwrap();
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn protocol_info_moves_to_node_info() {
        let mut harness = Harness::new();
        harness.controller.add_node(4).unwrap();
        harness.sent();

        let response = identify_response(vec![0xD3, 0x9C, 0x00, 0x04, 0x10, 0x01]);
        harness.controller.handle_protocol_info(4, &response).unwrap();

        let node = harness.controller.node(4).unwrap();
        assert!(node.protocol_info().unwrap().listening);
        assert_eq!(node.stage(), NodeStage::NodeInfo);

        let sent = harness.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_class(), MessageClass::RequestNodeInfo);
    }

    #[test]
    fn node_info_for_unknown_node_adds_it() {
        let mut harness = Harness::new();

        harness
            .controller
            .handle_frame(node_info_update(9, &[0x25, 0xEF, 0x20]))
            .unwrap();

        let node = harness.controller.node(9).unwrap();
        assert_eq!(node.stage(), NodeStage::ProtocolInfo);
        assert_eq!(
            node.node_info().unwrap().device_class,
            DeviceClass {
                basic: 0x04,
                generic: 0x10,
                specific: 0x01
            }
        );
        let root = node.endpoint(0).unwrap();
        assert_eq!(
            root.command_classes().collect::<Vec<_>>(),
            vec![CommandClassId::SwitchBinary]
        );
    }

    #[test]
    fn failed_node_info_request_changes_nothing() {
        let mut harness = Harness::new();
        let frame = Frame::request(
            0,
            MessageClass::ApplicationUpdate,
            Priority::High,
            vec![UPDATE_STATE_NODE_INFO_REQ_FAILED, 0x00, 0x00],
        );

        harness.controller.handle_frame(frame).unwrap();

        assert_eq!(harness.controller.nodes().count(), 0);
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn node_info_with_overlong_length_is_rejected() {
        let mut harness = Harness::new();
        let frame = Frame::request(
            9,
            MessageClass::ApplicationUpdate,
            Priority::High,
            vec![UPDATE_STATE_NODE_INFO_RECEIVED, 9, 8, 0x04, 0x10, 0x01, 0x25],
        );

        let error = harness.controller.handle_frame(frame).unwrap_err();
        assert!(error.is_decode());
        assert!(harness.controller.node(9).is_none());
    }

    #[test]
    fn responses_are_not_routed() {
        let mut harness = Harness::new();
        let frame = identify_response(vec![0xD3, 0x9C, 0x00, 0x04, 0x10, 0x01]);

        let error = harness.controller.handle_frame(frame).unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::UnexpectedMessage(MessageClass::IdentifyNode)
        ));
    }

    #[test]
    fn values_for_unknown_nodes_fail() {
        let mut harness = Harness::new();

        let error = harness
            .controller
            .request_value(3, 0, CommandClassId::SwitchBinary)
            .unwrap_err();
        assert!(matches!(error.kind, ErrorKind::UnknownNode(3)));
        assert!(harness.controller.poll(3).is_err());
    }

    #[test]
    fn closed_transmit_queue_is_a_channel_error() {
        let mut harness = Harness::new();
        drop(harness.transmit);

        let error = harness.controller.add_node(4).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::ChannelError));
        assert!(harness.events.try_recv().is_err());
    }
}
