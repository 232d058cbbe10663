use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{pad_to_8, test_bit};
use crate::ofp_message::OfpSerializationError;
use crate::packet::MacAddr;

/// Buffer id meaning "the switch holds no copy of this packet".
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// `max_len` asking the switch to send the complete packet to the controller.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

const OFPG_ANY: u32 = 0xffff_ffff;

/// OpenFlow 1.3 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello = 0,
    Error = 1,
    EchoReq = 2,
    EchoResp = 3,
    Experimenter = 4,
    FeaturesReq = 5,
    FeaturesResp = 6,
    GetConfigReq = 7,
    GetConfigResp = 8,
    SetConfig = 9,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    GroupMod = 15,
    PortMod = 16,
    TableMod = 17,
    MultipartReq = 18,
    MultipartResp = 19,
    BarrierReq = 20,
    BarrierResp = 21,
    QueueGetConfigReq = 22,
    QueueGetConfigResp = 23,
    RoleReq = 24,
    RoleResp = 25,
    GetAsyncReq = 26,
    GetAsyncResp = 27,
    SetAsync = 28,
    MeterMod = 29,
}

impl MsgCode {
    pub fn from_u8(code: u8) -> Option<MsgCode> {
        let msg = match code {
            0 => MsgCode::Hello,
            1 => MsgCode::Error,
            2 => MsgCode::EchoReq,
            3 => MsgCode::EchoResp,
            4 => MsgCode::Experimenter,
            5 => MsgCode::FeaturesReq,
            6 => MsgCode::FeaturesResp,
            7 => MsgCode::GetConfigReq,
            8 => MsgCode::GetConfigResp,
            9 => MsgCode::SetConfig,
            10 => MsgCode::PacketIn,
            11 => MsgCode::FlowRemoved,
            12 => MsgCode::PortStatus,
            13 => MsgCode::PacketOut,
            14 => MsgCode::FlowMod,
            15 => MsgCode::GroupMod,
            16 => MsgCode::PortMod,
            17 => MsgCode::TableMod,
            18 => MsgCode::MultipartReq,
            19 => MsgCode::MultipartResp,
            20 => MsgCode::BarrierReq,
            21 => MsgCode::BarrierResp,
            22 => MsgCode::QueueGetConfigReq,
            23 => MsgCode::QueueGetConfigResp,
            24 => MsgCode::RoleReq,
            25 => MsgCode::RoleResp,
            26 => MsgCode::GetAsyncReq,
            27 => MsgCode::GetAsyncResp,
            28 => MsgCode::SetAsync,
            29 => MsgCode::MeterMod,
            _ => return None,
        };
        Some(msg)
    }
}

impl fmt::Display for MsgCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(msg: &Self) -> usize;
    /// Parse a body buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self, OfpSerializationError>;
    /// Marshal a message body into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError>;
}

fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

fn skip(bytes: &mut Cursor<&[u8]>, n: usize, message: &'static str) -> Result<(), OfpSerializationError> {
    let left = remaining(bytes);
    if left < n {
        return Err(OfpSerializationError::short(message, left, n));
    }
    bytes.set_position(bytes.position() + n as u64);
    Ok(())
}

fn take<'a>(
    bytes: &mut Cursor<&'a [u8]>,
    n: usize,
    message: &'static str,
) -> Result<&'a [u8], OfpSerializationError> {
    let start = bytes.position() as usize;
    skip(bytes, n, message)?;
    let buf: &'a [u8] = *bytes.get_ref();
    Ok(&buf[start..start + n])
}

fn write_padding_bytes(bytes: &mut Vec<u8>, count: usize) {
    bytes.resize(bytes.len() + count, 0);
}

#[repr(u32)]
enum OfpPort {
    OFPPMax = 0xffff_ff00,
    OFPPInPort = 0xffff_fff8,
    OFPPTable = 0xffff_fff9,
    OFPPNormal = 0xffff_fffa,
    OFPPFlood = 0xffff_fffb,
    OFPPAll = 0xffff_fffc,
    OFPPController = 0xffff_fffd,
    OFPPLocal = 0xffff_fffe,
    OFPPAny = 0xffff_ffff,
}

/// Port behavior.
///
/// Reserved OpenFlow ports are distinct variants so that callers never juggle
/// magic port numbers. `Controller` carries the number of packet bytes the
/// switch should send up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u32),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u16),
    Local,
}

impl PseudoPort {
    /// `None` for `OFPP_ANY`, which stands for "no port" in optional port fields.
    fn of_int(p: u32) -> Result<Option<PseudoPort>, OfpSerializationError> {
        if p == OfpPort::OFPPAny as u32 {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u32, max_len: u16) -> Result<PseudoPort, OfpSerializationError> {
        let port = match p {
            p if p == OfpPort::OFPPInPort as u32 => PseudoPort::InPort,
            p if p == OfpPort::OFPPTable as u32 => PseudoPort::Table,
            p if p == OfpPort::OFPPNormal as u32 => PseudoPort::Normal,
            p if p == OfpPort::OFPPFlood as u32 => PseudoPort::Flood,
            p if p == OfpPort::OFPPAll as u32 => PseudoPort::AllPorts,
            p if p == OfpPort::OFPPController as u32 => PseudoPort::Controller(max_len),
            p if p == OfpPort::OFPPLocal as u32 => PseudoPort::Local,
            p if p <= OfpPort::OFPPMax as u32 => PseudoPort::PhysicalPort(p),
            p => {
                return Err(OfpSerializationError::UnexpectedValue {
                    value: format!("0x{:x}", p),
                    field: "port",
                    message: "action output",
                })
            }
        };
        Ok(port)
    }

    pub fn to_int(self) -> u32 {
        match self {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u32,
            PseudoPort::Table => OfpPort::OFPPTable as u32,
            PseudoPort::Normal => OfpPort::OFPPNormal as u32,
            PseudoPort::Flood => OfpPort::OFPPFlood as u32,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u32,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u32,
            PseudoPort::Local => OfpPort::OFPPLocal as u32,
        }
    }

    fn marshal(pp: PseudoPort, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u32::<BigEndian>(pp.to_int())?;
        Ok(())
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
}

const OFP_ACTION_OUTPUT_LEN: usize = 16;

impl Action {
    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::OFPATOutput,
        }
    }

    fn size_of(a: &Action) -> usize {
        match *a {
            Action::Output(_) => OFP_ACTION_OUTPUT_LEN,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Action, OfpSerializationError> {
        let action_code = bytes.read_u16::<BigEndian>()?;
        let len = bytes.read_u16::<BigEndian>()? as usize;
        match action_code {
            t if t == OfpActionType::OFPATOutput as u16 => {
                let port_code = bytes.read_u32::<BigEndian>()?;
                let max_len = bytes.read_u16::<BigEndian>()?;
                skip(bytes, 6, "action output")?;
                Ok(Action::Output(PseudoPort::make(port_code, max_len)?))
            }
            code => Err(OfpSerializationError::UnexpectedValue {
                value: format!("{} (len {})", code, len),
                field: "type",
                message: "action",
            }),
        }
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<Action>, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let mut actions = vec![];
        while remaining(&bytes) > 0 {
            actions.push(Action::parse(&mut bytes)?);
        }
        Ok(actions)
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .into_iter()
            .partition(|act| matches!(*act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(act: Action, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(Action::type_code(&act) as u16)?;
        bytes.write_u16::<BigEndian>(Action::size_of(&act) as u16)?;
        match act {
            Action::Output(pp) => {
                PseudoPort::marshal(pp, bytes)?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w,
                    _ => 0,
                })?;
                write_padding_bytes(bytes, 6);
            }
        }
        Ok(())
    }
}

const OFPMT_OXM: u16 = 1;
const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;

#[repr(u8)]
enum OxmField {
    InPort = 0,
    EthDst = 3,
    EthSrc = 4,
    EthType = 5,
}

/// Fields to match against flows. `None` wildcards the field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u32>,
    pub eth_dst: Option<MacAddr>,
    pub eth_src: Option<MacAddr>,
    pub eth_type: Option<u16>,
}

impl Pattern {
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Length of the `ofp_match` structure without trailing padding.
    fn match_len(&self) -> usize {
        let mut len = 4;
        if self.in_port.is_some() {
            len += 4 + 4;
        }
        if self.eth_dst.is_some() {
            len += 4 + 6;
        }
        if self.eth_src.is_some() {
            len += 4 + 6;
        }
        if self.eth_type.is_some() {
            len += 4 + 2;
        }
        len
    }

    fn size_of(&self) -> usize {
        let len = self.match_len();
        len + pad_to_8(len)
    }

    fn write_oxm_header(bytes: &mut Vec<u8>, field: OxmField, len: u8) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(OFPXMC_OPENFLOW_BASIC)?;
        bytes.write_u8((field as u8) << 1)?;
        bytes.write_u8(len)?;
        Ok(())
    }

    fn marshal(p: &Pattern, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let len = p.match_len();
        bytes.write_u16::<BigEndian>(OFPMT_OXM)?;
        bytes.write_u16::<BigEndian>(len as u16)?;
        if let Some(port) = p.in_port {
            Pattern::write_oxm_header(bytes, OxmField::InPort, 4)?;
            bytes.write_u32::<BigEndian>(port)?;
        }
        if let Some(mac) = p.eth_dst {
            Pattern::write_oxm_header(bytes, OxmField::EthDst, 6)?;
            bytes.extend_from_slice(mac.as_bytes());
        }
        if let Some(mac) = p.eth_src {
            Pattern::write_oxm_header(bytes, OxmField::EthSrc, 6)?;
            bytes.extend_from_slice(mac.as_bytes());
        }
        if let Some(typ) = p.eth_type {
            Pattern::write_oxm_header(bytes, OxmField::EthType, 2)?;
            bytes.write_u16::<BigEndian>(typ)?;
        }
        write_padding_bytes(bytes, pad_to_8(len));
        Ok(())
    }

    /// Parses an `ofp_match`, trailing padding included. OXM fields this
    /// controller never matches on are skipped.
    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern, OfpSerializationError> {
        let typ = bytes.read_u16::<BigEndian>()?;
        if typ != OFPMT_OXM {
            return Err(OfpSerializationError::UnexpectedValue {
                value: typ.to_string(),
                field: "type",
                message: "match",
            });
        }
        let len = bytes.read_u16::<BigEndian>()? as usize;
        if len < 4 {
            return Err(OfpSerializationError::UnexpectedValue {
                value: len.to_string(),
                field: "length",
                message: "match",
            });
        }
        let fields = take(bytes, len - 4, "match")?;
        skip(bytes, pad_to_8(len), "match padding")?;

        let mut pattern = Pattern::match_all();
        let mut oxm = Cursor::new(fields);
        while remaining(&oxm) > 0 {
            let class = oxm.read_u16::<BigEndian>()?;
            let field_and_mask = oxm.read_u8()?;
            let value_len = oxm.read_u8()? as usize;
            let value = take(&mut oxm, value_len, "oxm field")?;
            let has_mask = field_and_mask & 1 == 1;
            if class != OFPXMC_OPENFLOW_BASIC || has_mask {
                continue;
            }
            match field_and_mask >> 1 {
                f if f == OxmField::InPort as u8 && value_len == 4 => {
                    pattern.in_port = Some(Cursor::new(value).read_u32::<BigEndian>()?);
                }
                f if f == OxmField::EthDst as u8 && value_len == 6 => {
                    pattern.eth_dst = Some(MacAddr::new([
                        value[0], value[1], value[2], value[3], value[4], value[5],
                    ]));
                }
                f if f == OxmField::EthSrc as u8 && value_len == 6 => {
                    pattern.eth_src = Some(MacAddr::new([
                        value[0], value[1], value[2], value[3], value[4], value[5],
                    ]));
                }
                f if f == OxmField::EthType as u8 && value_len == 2 => {
                    pattern.eth_type = Some(Cursor::new(value).read_u16::<BigEndian>()?);
                }
                _ => (),
            }
        }
        Ok(pattern)
    }
}

const OFPIT_APPLY_ACTIONS: u16 = 4;

/// Flow instructions. Only immediate action application is used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    ApplyActions(Vec<Action>),
}

impl Instruction {
    fn size_of(ins: &Instruction) -> usize {
        match *ins {
            Instruction::ApplyActions(ref actions) => 8 + Action::size_of_sequence(actions),
        }
    }

    fn marshal(ins: Instruction, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let size = Instruction::size_of(&ins);
        match ins {
            Instruction::ApplyActions(actions) => {
                bytes.write_u16::<BigEndian>(OFPIT_APPLY_ACTIONS)?;
                bytes.write_u16::<BigEndian>(size as u16)?;
                write_padding_bytes(bytes, 4);
                for act in Action::move_controller_last(actions) {
                    Action::marshal(act, bytes)?;
                }
            }
        }
        Ok(())
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<Instruction>, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let mut instructions = vec![];
        while remaining(&bytes) > 0 {
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if typ != OFPIT_APPLY_ACTIONS || len < 8 {
                return Err(OfpSerializationError::UnexpectedValue {
                    value: format!("{} (len {})", typ, len),
                    field: "type",
                    message: "instruction",
                });
            }
            skip(&mut bytes, 4, "instruction")?;
            let actions = take(&mut bytes, len - 8, "instruction actions")?;
            instructions.push(Instruction::ApplyActions(Action::parse_sequence(actions)?));
        }
        Ok(instructions)
    }
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub group_stats: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub port_blocked: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d),
            table_stats: test_bit(1, d),
            port_stats: test_bit(2, d),
            group_stats: test_bit(3, d),
            ip_reasm: test_bit(5, d),
            queue_stats: test_bit(6, d),
            port_blocked: test_bit(8, d),
        }
    }

    fn to_int(c: Capabilities) -> u32 {
        let flags: [(bool, u32); 7] = [
            (c.flow_stats, 0),
            (c.table_stats, 1),
            (c.port_stats, 2),
            (c.group_stats, 3),
            (c.ip_reasm, 5),
            (c.queue_stats, 6),
            (c.port_blocked, 8),
        ];
        flags
            .iter()
            .filter(|&&(set, _)| set)
            .fold(0u32, |acc, &(_, bit)| acc | (1u32 << bit))
    }
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub auxiliary_id: u8,
    pub supported_capabilities: Capabilities,
}

const OFP_SWITCH_FEATURES_LEN: usize = 24;

impl MessageType for SwitchFeatures {
    fn size_of(_: &SwitchFeatures) -> usize {
        OFP_SWITCH_FEATURES_LEN
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, OfpSerializationError> {
        if buf.len() < OFP_SWITCH_FEATURES_LEN {
            return Err(OfpSerializationError::short(
                "features reply",
                buf.len(),
                OFP_SWITCH_FEATURES_LEN,
            ));
        }
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        let auxiliary_id = bytes.read_u8()?;
        skip(&mut bytes, 2, "features reply")?;
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            auxiliary_id,
            supported_capabilities,
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        bytes.write_u8(sf.auxiliary_id)?;
        write_padding_bytes(bytes, 2);
        bytes.write_u32::<BigEndian>(Capabilities::to_int(sf.supported_capabilities))?;
        bytes.write_u32::<BigEndian>(0)?;
        Ok(())
    }
}

/// Type of modification to perform on a flow table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow = 0,
    ModFlow = 1,
    ModStrictFlow = 2,
    DeleteFlow = 3,
    DeleteStrictFlow = 4,
}

impl FlowModCmd {
    fn of_int(c: u8) -> Result<FlowModCmd, OfpSerializationError> {
        match c {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(OfpSerializationError::UnexpectedValue {
                value: c.to_string(),
                field: "command",
                message: "flow mod",
            }),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub table_id: u8,
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub instructions: Vec<Instruction>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    /// Buffered packet the switch should run through the new flow.
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

const OFP_FLOW_MOD_FIXED_LEN: usize = 40;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }

    /// All actions of the flow's apply-actions instructions, in order.
    pub fn actions(&self) -> Vec<Action> {
        self.instructions
            .iter()
            .flat_map(|ins| match ins {
                Instruction::ApplyActions(actions) => actions.iter().copied(),
            })
            .collect()
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        OFP_FLOW_MOD_FIXED_LEN
            + msg.pattern.size_of()
            + msg.instructions.iter().map(Instruction::size_of).sum::<usize>()
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let cookie = bytes.read_u64::<BigEndian>()?;
        let _cookie_mask = bytes.read_u64::<BigEndian>()?;
        let table_id = bytes.read_u8()?;
        let command = FlowModCmd::of_int(bytes.read_u8()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u32::<BigEndian>()?)?;
        let _out_group = bytes.read_u32::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()?;
        skip(&mut bytes, 2, "flow mod")?;
        let pattern = Pattern::parse(&mut bytes)?;
        let left = remaining(&bytes);
        let rest = take(&mut bytes, left, "flow mod instructions")?;
        let instructions = Instruction::parse_sequence(rest)?;
        Ok(FlowMod {
            table_id,
            command,
            pattern,
            priority,
            instructions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: match buffer_id {
                OFP_NO_BUFFER => None,
                n => Some(n),
            },
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u64::<BigEndian>(0)?;
        bytes.write_u8(fm.table_id)?;
        bytes.write_u8(fm.command as u8)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        match fm.out_port {
            None => bytes.write_u32::<BigEndian>(OfpPort::OFPPAny as u32)?,
            Some(x) => PseudoPort::marshal(x, bytes)?,
        }
        bytes.write_u32::<BigEndian>(OFPG_ANY)?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(fm.check_overlap, fm.notify_when_removed))?;
        write_padding_bytes(bytes, 2);
        Pattern::marshal(&fm.pattern, bytes)?;
        for ins in fm.instructions {
            Instruction::marshal(ins, bytes)?;
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        Payload::bytes(payload).len()
    }

    pub fn bytes(payload: &Payload) -> &[u8] {
        match *payload {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    pub fn buffer_id(payload: &Payload) -> Option<u32> {
        match *payload {
            Payload::Buffered(id, _) => Some(id),
            Payload::NotBuffered(_) => None,
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch = 0,
    Action = 1,
    InvalidTtl = 2,
}

impl PacketInReason {
    fn of_int(r: u8) -> Result<PacketInReason, OfpSerializationError> {
        match r {
            0 => Ok(PacketInReason::NoMatch),
            1 => Ok(PacketInReason::Action),
            2 => Ok(PacketInReason::InvalidTtl),
            r => Err(OfpSerializationError::UnexpectedValue {
                value: r.to_string(),
                field: "reason",
                message: "packet in",
            }),
        }
    }
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
    pub pattern: Pattern,
}

const OFP_PACKET_IN_FIXED_LEN: usize = 16;

impl PacketIn {
    /// Ingress port, carried as the `in_port` OXM field of the packet-in match.
    pub fn in_port(&self) -> Option<u32> {
        self.pattern.in_port
    }
}

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        OFP_PACKET_IN_FIXED_LEN + pi.pattern.size_of() + 2 + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let reason = PacketInReason::of_int(bytes.read_u8()?)?;
        let table_id = bytes.read_u8()?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let pattern = Pattern::parse(&mut bytes)?;
        skip(&mut bytes, 2, "packet in")?;
        let left = remaining(&bytes);
        let pk = take(&mut bytes, left, "packet in data")?.to_vec();
        let input_payload = match buffer_id {
            OFP_NO_BUFFER => Payload::NotBuffered(pk),
            n => Payload::Buffered(n, pk),
        };
        Ok(PacketIn {
            input_payload,
            total_len,
            reason,
            table_id,
            cookie,
            pattern,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u32::<BigEndian>(Payload::buffer_id(&pi.input_payload).unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u8(pi.reason as u8)?;
        bytes.write_u8(pi.table_id)?;
        bytes.write_u64::<BigEndian>(pi.cookie)?;
        Pattern::marshal(&pi.pattern, bytes)?;
        write_padding_bytes(bytes, 2);
        bytes.extend_from_slice(Payload::bytes(&pi.input_payload));
        Ok(())
    }
}

/// Packet contents for a packet-out: a switch-held buffer, or the raw frame.
/// Never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PacketData {
    Buffered(u32),
    Raw(Vec<u8>),
}

impl PacketData {
    /// The data a packet-out should reference for a received `payload`.
    pub fn of_payload(payload: &Payload) -> PacketData {
        match *payload {
            Payload::Buffered(id, _) => PacketData::Buffered(id),
            Payload::NotBuffered(ref buf) => PacketData::Raw(buf.clone()),
        }
    }

    fn size_of(data: &PacketData) -> usize {
        match *data {
            PacketData::Buffered(_) => 0,
            PacketData::Raw(ref buf) => buf.len(),
        }
    }
}

/// Send a packet out of the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: PacketData,
    pub port_id: Option<u32>,
    pub apply_actions: Vec<Action>,
}

const OFP_PACKET_OUT_FIXED_LEN: usize = 16;

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        OFP_PACKET_OUT_FIXED_LEN
            + Action::size_of_sequence(&po.apply_actions)
            + PacketData::size_of(&po.output_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketOut, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u32::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        skip(&mut bytes, 6, "packet out")?;
        let actions = take(&mut bytes, actions_len, "packet out actions")?;
        let apply_actions = Action::parse_sequence(actions)?;
        let output_payload = match buffer_id {
            OFP_NO_BUFFER => {
                let left = remaining(&bytes);
                PacketData::Raw(take(&mut bytes, left, "packet out data")?.to_vec())
            }
            n => PacketData::Buffered(n),
        };
        Ok(PacketOut {
            output_payload,
            port_id: if in_port == OfpPort::OFPPController as u32 {
                None
            } else {
                Some(in_port)
            },
            apply_actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u32::<BigEndian>(match po.output_payload {
            PacketData::Buffered(n) => n,
            PacketData::Raw(_) => OFP_NO_BUFFER,
        })?;
        match po.port_id {
            Some(id) => PseudoPort::marshal(PseudoPort::PhysicalPort(id), bytes)?,
            None => bytes.write_u32::<BigEndian>(OfpPort::OFPPController as u32)?,
        }
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        write_padding_bytes(bytes, 6);
        for act in Action::move_controller_last(po.apply_actions) {
            Action::marshal(act, bytes)?;
        }
        if let PacketData::Raw(buf) = po.output_payload {
            bytes.extend_from_slice(&buf);
        }
        Ok(())
    }
}

/// Error reported by the switch: type, code, and (part of) the offending request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(err: &ErrorMsg) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        let left = remaining(&bytes);
        let data = take(&mut bytes, left, "error data")?.to_vec();
        Ok(ErrorMsg { typ, code, data })
    }

    fn marshal(err: ErrorMsg, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(err.typ)?;
        bytes.write_u16::<BigEndian>(err.code)?;
        bytes.extend_from_slice(&err.data);
        Ok(())
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::{OfpHeader, Xid, OPENFLOW_0_04_VERSION};
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        BarrierRequest,
        BarrierReply,
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        pub fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
            }
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
            match msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::BarrierRequest
                | Message::BarrierReply => Ok(()),
                Message::Error(err) => ErrorMsg::marshal(err, bytes),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::FeaturesReply(feats) => SwitchFeatures::marshal(feats, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(po) => PacketOut::marshal(po, bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            let body = match *msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::BarrierRequest
                | Message::BarrierReply => 0,
                Message::Error(ref err) => ErrorMsg::size_of(err),
                Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => buf.len(),
                Message::FeaturesReply(ref feats) => SwitchFeatures::size_of(feats),
                Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                Message::PacketOut(ref po) => PacketOut::size_of(po),
            };
            OfpHeader::size() + body
        }

        fn header_of(xid: Xid, msg: &Message) -> OfpHeader {
            OfpHeader::new(
                OPENFLOW_0_04_VERSION,
                Message::msg_code_of_message(msg) as u8,
                Self::size_of(msg) as u16,
                xid,
            )
        }

        fn marshal(xid: Xid, msg: Message) -> Result<Vec<u8>, OfpSerializationError> {
            let hdr = Self::header_of(xid, &msg);
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr)?;
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(Xid, Message), OfpSerializationError> {
            let typ = MsgCode::from_u8(header.type_code())
                .ok_or(OfpSerializationError::UnsupportedMessageCode(header.type_code()))?;
            // Hello carries the peer's highest version; anything else must be 1.3.
            if typ != MsgCode::Hello && header.version() != OPENFLOW_0_04_VERSION {
                return Err(OfpSerializationError::UnsupportedVersion(header.version()));
            }
            let msg = match typ {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                code => return Err(OfpSerializationError::UnsupportedMessageCode(code as u8)),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a permanent flow parameterized by the given `priority`,
    /// `pattern`, and `actions`, applied immediately on match.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            table_id: 0,
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            instructions: vec![Instruction::ApplyActions(actions)],
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            apply_to_packet: None,
            out_port: None,
            check_overlap: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::message::*;
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    fn parse(bytes: &[u8]) -> (OfpHeader, Message) {
        let header = OfpHeader::parse(bytes).unwrap();
        assert_eq!(header.length(), bytes.len());
        let (_, msg) = Message::parse(&header, &bytes[8..]).unwrap();
        (header, msg)
    }

    #[test]
    fn marshal_table_miss_flow_mod() {
        let miss = add_flow(
            0,
            Pattern::match_all(),
            vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))],
        );
        let data = Message::marshal(0, Message::FlowMod(miss)).unwrap();
        let reference: Vec<u8> = vec![
            0x04, 0x0e, 0x00, 0x50, 0x00, 0x00, 0x00, 0x00, // header
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // cookie
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // cookie mask
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // table, command, timeouts, priority
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // buffer id, out port
            0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, // out group, flags, pad
            0x00, 0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, // empty oxm match
            0x00, 0x04, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00, // apply actions
            0x00, 0x00, 0x00, 0x10, 0xff, 0xff, 0xff, 0xfd, // output controller
            0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // max len no buffer
        ];
        assert_eq!(reference, data);
    }

    #[test]
    fn marshal_unicast_match_is_padded() {
        let mut pattern = Pattern::match_all();
        pattern.in_port = Some(1);
        pattern.eth_dst = Some(MacAddr::new([0, 0, 0, 0, 0, 4]));
        let mut bytes = vec![];
        Pattern::marshal(&pattern, &mut bytes).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x00, 0x01, 0x00, 0x16, // oxm, length 22
                0x80, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, // in_port = 1
                0x80, 0x00, 0x06, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, // eth_dst
                0x00, 0x00, // pad
            ]
        );
        assert_eq!(bytes.len(), pattern.size_of());
    }

    #[test]
    fn flow_mod_survives_the_wire() {
        let mut pattern = Pattern::match_all();
        pattern.in_port = Some(3);
        pattern.eth_dst = Some(MacAddr::new([0x52, 0x54, 0, 0x12, 0x34, 0x56]));
        let mut fm = add_flow(1, pattern, vec![Action::Output(PseudoPort::PhysicalPort(5))]);
        fm.apply_to_packet = Some(77);
        let data = Message::marshal(9, Message::FlowMod(fm.clone())).unwrap();
        let (header, msg) = parse(&data);
        assert_eq!(header.xid(), 9);
        assert_eq!(msg, Message::FlowMod(fm));
    }

    #[test]
    fn packet_out_with_buffer_carries_no_data() {
        let po = PacketOut {
            output_payload: PacketData::Buffered(0x100),
            port_id: Some(2),
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(4))],
        };
        let data = Message::marshal(1, Message::PacketOut(po.clone())).unwrap();
        assert_eq!(data.len(), 8 + 16 + 16);
        assert_eq!(&data[8..12], &[0x00, 0x00, 0x01, 0x00]);
        assert_eq!(parse(&data).1, Message::PacketOut(po));
    }

    #[test]
    fn packet_out_without_buffer_appends_frame() {
        let po = PacketOut {
            output_payload: PacketData::Raw(vec![0xaa; 60]),
            port_id: Some(1),
            apply_actions: vec![],
        };
        let data = Message::marshal(1, Message::PacketOut(po.clone())).unwrap();
        assert_eq!(data.len(), 8 + 16 + 60);
        assert_eq!(&data[8..12], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(parse(&data).1, Message::PacketOut(po));
    }

    #[test]
    fn parse_packet_in_reads_in_port_from_match() {
        let body: Vec<u8> = vec![
            0x00, 0x00, 0x01, 0x02, // buffer id
            0x00, 0x40, 0x00, 0x00, // total len 64, no match, table 0
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // cookie
            0x00, 0x01, 0x00, 0x0c, 0x80, 0x00, 0x00, 0x04, // oxm, in_port
            0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, // port 6, pad
            0x00, 0x00, // pad
            0xde, 0xad, // data
        ];
        let pi = PacketIn::parse(&body).unwrap();
        assert_eq!(pi.in_port(), Some(6));
        assert_eq!(pi.total_len, 64);
        assert_eq!(pi.reason, PacketInReason::NoMatch);
        assert_eq!(pi.input_payload, Payload::Buffered(0x102, vec![0xde, 0xad]));
        assert_eq!(Payload::size_of(&pi.input_payload), 2);
    }

    #[test]
    fn parse_match_skips_unknown_and_masked_fields() {
        let buf: Vec<u8> = vec![
            0x00, 0x01, 0x00, 0x15, // oxm, length 21
            0x80, 0x00, 0x14, 0x01, 0x06, // ip_proto = tcp
            0x80, 0x00, 0x0b, 0x04, 0xff, 0x00, 0x00, 0x00, // masked eth_type
            0x80, 0x00, 0x00, 0x00, // zero-length in_port is ignored
            0x00, 0x00, 0x00, // pad
        ];
        let mut bytes = Cursor::new(&buf[..]);
        assert_eq!(Pattern::parse(&mut bytes).unwrap(), Pattern::match_all());
        assert_eq!(remaining(&bytes), 0);
    }

    #[test]
    fn parse_features_reply() {
        let feats = SwitchFeatures {
            datapath_id: 0x0000_0000_0000_0001,
            num_buffers: 256,
            num_tables: 254,
            auxiliary_id: 0,
            supported_capabilities: Capabilities {
                flow_stats: true,
                port_stats: true,
                port_blocked: true,
                ..Default::default()
            },
        };
        let data = Message::marshal(3, Message::FeaturesReply(feats.clone())).unwrap();
        assert_eq!(data.len(), 32);
        assert_eq!(parse(&data).1, Message::FeaturesReply(feats));
    }

    #[test]
    fn parse_echo_and_error() {
        let data = Message::marshal(5, Message::EchoRequest(vec![1, 2, 3])).unwrap();
        assert_eq!(parse(&data).1, Message::EchoRequest(vec![1, 2, 3]));

        let err = ErrorMsg {
            typ: 1,
            code: 6,
            data: vec![0x04, 0x0e],
        };
        let data = Message::marshal(5, Message::Error(err.clone())).unwrap();
        assert_eq!(parse(&data).1, Message::Error(err));
    }

    #[test]
    fn parse_rejects_unsupported_codes_and_versions() {
        let header = OfpHeader::new(0x04, 19, 8, 0);
        assert!(matches!(
            Message::parse(&header, &[]),
            Err(OfpSerializationError::UnsupportedMessageCode(19))
        ));
        let header = OfpHeader::new(0x01, 2, 8, 0);
        assert!(matches!(
            Message::parse(&header, &[]),
            Err(OfpSerializationError::UnsupportedVersion(1))
        ));
        let header = OfpHeader::new(0x06, 0, 8, 0);
        assert_eq!(Message::parse(&header, &[]).unwrap().1, Message::Hello);
    }

    #[test]
    fn controller_actions_are_marshaled_last() {
        let actions = vec![
            Action::Output(PseudoPort::Controller(128)),
            Action::Output(PseudoPort::PhysicalPort(1)),
        ];
        assert_eq!(
            Action::move_controller_last(actions),
            vec![
                Action::Output(PseudoPort::PhysicalPort(1)),
                Action::Output(PseudoPort::Controller(128)),
            ]
        );
    }
}
