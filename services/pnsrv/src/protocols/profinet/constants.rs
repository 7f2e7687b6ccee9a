//! PROFINET IO wire constants

/// EtherType for PROFINET real-time and DCP frames
pub const ETHERTYPE_PROFINET: u16 = 0x8892;
/// 802.1Q VLAN tag, may precede the PROFINET EtherType
pub const ETHERTYPE_VLAN: u16 = 0x8100;

/// DCP Identify multicast destination
pub const DCP_MULTICAST_MAC: [u8; 6] = [0x01, 0x0E, 0xCF, 0x00, 0x00, 0x00];

pub const ETH_HEADER_LEN: usize = 14;
/// Minimum Ethernet payload without FCS
pub const ETH_MIN_FRAME_LEN: usize = 60;

// ============================================================================
// DCP
// ============================================================================

pub const FRAME_ID_DCP_IDENTIFY_REQ: u16 = 0xFEFE;
pub const FRAME_ID_DCP_IDENTIFY_RES_FIRST: u16 = 0xFEFC;
pub const FRAME_ID_DCP_IDENTIFY_RES_LAST: u16 = 0xFEFF;
pub const FRAME_ID_DCP_IDENTIFY_RES: u16 = 0xFEFF;

pub const DCP_SERVICE_IDENTIFY: u8 = 0x05;
pub const DCP_SERVICE_TYPE_REQUEST: u8 = 0x00;
pub const DCP_SERVICE_TYPE_RESPONSE: u8 = 0x01;
pub const DCP_HEADER_LEN: usize = 10;

pub const DCP_OPT_IP: u8 = 0x01;
pub const DCP_OPT_DEVICE: u8 = 0x02;
pub const DCP_OPT_ALL: u8 = 0xFF;

pub const DCP_SUB_IP_PARAMETER: u8 = 0x02;
pub const DCP_SUB_DEVICE_VENDOR: u8 = 0x01;
pub const DCP_SUB_DEVICE_NAME: u8 = 0x02;
pub const DCP_SUB_DEVICE_ID: u8 = 0x03;
pub const DCP_SUB_DEVICE_ROLE: u8 = 0x04;
pub const DCP_SUB_ALL: u8 = 0xFF;

/// Response delay factor for Identify-All, in 10 ms units
pub const DCP_DEFAULT_RESPONSE_DELAY: u16 = 0x0080;

// ============================================================================
// RPC
// ============================================================================

pub const RPC_PORT: u16 = 34964;

pub const RPC_OPNUM_CONNECT: u16 = 0;
pub const RPC_OPNUM_RELEASE: u16 = 1;
pub const RPC_OPNUM_CONTROL: u16 = 4;

/// PNIO device interface `DEA00001-6C97-11D1-8271-00A02442DF7D`
pub const PNIO_DEVICE_INTERFACE: [u8; 16] = [
    0xDE, 0xA0, 0x00, 0x01, 0x6C, 0x97, 0x11, 0xD1, 0x82, 0x71, 0x00, 0xA0, 0x24, 0x42, 0xDF, 0x7D,
];
/// PNIO controller interface `DEA00002-6C97-11D1-8271-00A02442DF7D`
pub const PNIO_CONTROLLER_INTERFACE: [u8; 16] = [
    0xDE, 0xA0, 0x00, 0x02, 0x6C, 0x97, 0x11, 0xD1, 0x82, 0x71, 0x00, 0xA0, 0x24, 0x42, 0xDF, 0x7D,
];
/// Object UUID prefix, the last 6 bytes carry instance, device and vendor ids
pub const PNIO_OBJECT_UUID_PREFIX: [u8; 10] =
    [0xDE, 0xA0, 0x00, 0x00, 0x6C, 0x97, 0x11, 0xD1, 0x82, 0x71];

// ============================================================================
// Blocks
// ============================================================================

pub const BLOCK_AR_REQ: u16 = 0x0101;
pub const BLOCK_IOCR_REQ: u16 = 0x0102;
pub const BLOCK_ALARM_CR_REQ: u16 = 0x0103;
pub const BLOCK_EXPECTED_SUBMODULE_REQ: u16 = 0x0104;
pub const BLOCK_IOD_CONTROL_REQ: u16 = 0x0110;
pub const BLOCK_IOX_CONTROL_REQ: u16 = 0x0112;
pub const BLOCK_RELEASE_REQ: u16 = 0x0114;

pub const BLOCK_AR_RES: u16 = 0x8101;
pub const BLOCK_IOCR_RES: u16 = 0x8102;
pub const BLOCK_ALARM_CR_RES: u16 = 0x8103;
pub const BLOCK_MODULE_DIFF: u16 = 0x8104;
pub const BLOCK_IOD_CONTROL_RES: u16 = 0x8110;
pub const BLOCK_IOX_CONTROL_RES: u16 = 0x8112;
pub const BLOCK_RELEASE_RES: u16 = 0x8114;

pub const CONTROL_CMD_PRM_END: u16 = 0x0001;
pub const CONTROL_CMD_APPLICATION_READY: u16 = 0x0002;
pub const CONTROL_CMD_RELEASE: u16 = 0x0004;
pub const CONTROL_CMD_DONE: u16 = 0x0008;

pub const AR_TYPE_IOC_SINGLE: u16 = 0x0001;
pub const AR_PROPERTIES_DEFAULT: u32 = 0x0000_0011;
pub const AR_ACTIVITY_TIMEOUT_FACTOR: u16 = 100;

pub const IOCR_TYPE_INPUT: u16 = 0x0001;
pub const IOCR_TYPE_OUTPUT: u16 = 0x0002;
/// RT_CLASS_1
pub const IOCR_PROPERTIES_RT_CLASS_1: u32 = 0x0000_0002;
pub const IOCR_TAG_HEADER: u16 = 0xC000;

pub const ALARM_CR_TYPE: u16 = 0x0001;
pub const ALARM_CR_RTA_TIMEOUT_FACTOR: u16 = 1;
pub const ALARM_CR_RTA_RETRIES: u16 = 3;
pub const ALARM_CR_MAX_DATA_LENGTH: u16 = 200;
pub const ALARM_CR_TAG_HIGH: u16 = 0xC000;
pub const ALARM_CR_TAG_LOW: u16 = 0xA000;

pub const API_DEFAULT: u32 = 0;

// ============================================================================
// Cyclic RT
// ============================================================================

/// Requested frame ids; the device may assign others in its IOCR response
pub const FRAME_ID_OUTPUT_DEFAULT: u16 = 0x8000;
pub const FRAME_ID_INPUT_DEFAULT: u16 = 0x8001;

/// Send clock factor 32 gives a 1 ms base clock (31.25 us units)
pub const SEND_CLOCK_FACTOR: u16 = 32;
pub const MAX_REDUCTION_RATIO: u16 = 512;

/// Minimum C_SDU length for RT_CLASS_1 frames
pub const RT_MIN_C_SDU_LEN: usize = 40;
pub const RT_APDU_STATUS_LEN: usize = 4;

pub const IOXS_GOOD: u8 = 0x80;
pub const IOXS_BAD: u8 = 0x00;

/// DataStatus bits
pub const DATA_STATUS_STATE_PRIMARY: u8 = 0x01;
pub const DATA_STATUS_DATA_VALID: u8 = 0x04;
pub const DATA_STATUS_PROVIDER_RUN: u8 = 0x10;
pub const DATA_STATUS_STATION_OK: u8 = 0x20;
pub const DATA_STATUS_DEFAULT: u8 = DATA_STATUS_STATE_PRIMARY
    | DATA_STATUS_DATA_VALID
    | DATA_STATUS_PROVIDER_RUN
    | DATA_STATUS_STATION_OK;

/// Value bytes carried per slot
pub const INPUT_SLOT_DATA_LEN: u16 = 5;
pub const OUTPUT_SLOT_DATA_LEN: u16 = 4;
