use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use ffmpeg_media::annexb::{NAL_PPS, NAL_SPS, nal_type, nal_units};

pub const PAYLOAD_TYPE: u8 = 96;
pub const TRACK_CONTROL: &str = "trackID=0";

/// Latest SPS/PPS seen in the encoded stream.
#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl ParameterSets {
    pub fn update_from(&mut self, access_unit: &[u8]) {
        for nal in nal_units(access_unit) {
            match nal_type(nal) {
                NAL_SPS => self.sps = Some(Bytes::copy_from_slice(nal)),
                NAL_PPS => self.pps = Some(Bytes::copy_from_slice(nal)),
                _ => {}
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// profile_idc, constraint flags and level_idc as six hex digits.
    pub fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_ref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02X}{:02X}{:02X}", sps[1], sps[2], sps[3]))
    }

    pub fn sprop_parameter_sets(&self) -> Option<String> {
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) => Some(format!("{},{}", STANDARD.encode(sps), STANDARD.encode(pps))),
            _ => None,
        }
    }
}

pub fn session_description(params: &ParameterSets, session_id: u64, fps: u32) -> String {
    let mut fmtp = format!("a=fmtp:{} packetization-mode=1", PAYLOAD_TYPE);
    if let Some(profile) = params.profile_level_id() {
        fmtp.push_str(&format!(";profile-level-id={}", profile));
    }
    if let Some(sprop) = params.sprop_parameter_sets() {
        fmtp.push_str(&format!(";sprop-parameter-sets={}", sprop));
    }

    [
        "v=0".to_string(),
        format!("o=- {} 1 IN IP4 0.0.0.0", session_id),
        "s=rtsp-sim".to_string(),
        "c=IN IP4 0.0.0.0".to_string(),
        "t=0 0".to_string(),
        "a=control:*".to_string(),
        "a=range:npt=0-".to_string(),
        format!("m=video 0 RTP/AVP {}", PAYLOAD_TYPE),
        format!("a=rtpmap:{} H264/90000", PAYLOAD_TYPE),
        fmtp,
        format!("a=framerate:{}", fps),
        format!("a=control:{}", TRACK_CONTROL),
    ]
    .join("\r\n")
        + "\r\n"
}
