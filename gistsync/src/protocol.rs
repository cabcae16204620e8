//! Git smart-HTTP (protocol v0) messages
//!
//! Parsing of ref advertisements and `git-upload-pack` / `git-receive-pack`
//! responses, and construction of their request bodies. Nothing here performs
//! I/O; [`crate::http::HttpRemote`] moves the bytes.

use crate::error::TransportError;
use crate::remote::RefUpdate;
use bytes::Bytes;
use gistsync_core::{ObjectId, Packet, PktReader, PktWriter, demux_sideband};

pub const UPLOAD_PACK: &str = "git-upload-pack";
pub const RECEIVE_PACK: &str = "git-receive-pack";

const HEADS_PREFIX: &str = "refs/heads/";

/// Refs and capabilities announced by `info/refs`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// `HEAD` when advertised
    pub head: Option<ObjectId>,
    /// Every other ref in advertisement order
    pub refs: Vec<(String, ObjectId)>,
    pub capabilities: Vec<String>,
}

impl Advertisement {
    /// Parse an `info/refs?service=<service>` response body
    pub fn parse(body: &[u8], service: &str) -> Result<Self, TransportError> {
        let mut reader = PktReader::new(body);
        let mut adv = Advertisement::default();
        let mut first = true;

        // Smart servers open with a "# service=" banner and a flush
        if body.get(4..14) == Some(b"# service=".as_slice()) {
            let banner = reader.next_packet()?.and_then(|p| p.as_text()).unwrap_or_default();
            if banner != format!("# service={}", service) {
                return Err(TransportError::Protocol(format!("Unexpected banner {:?}", banner)));
            }
            if reader.next_packet()? != Some(Packet::Flush) {
                return Err(TransportError::Protocol("Missing flush after service banner".into()));
            }
        }

        while let Some(packet) = reader.next_packet()? {
            let line = match packet {
                Packet::Flush => break,
                Packet::Data(_) => packet
                    .as_text()
                    .ok_or_else(|| TransportError::Protocol("Ref line is not UTF-8".into()))?,
                _ => continue,
            };
            if let Some(message) = line.strip_prefix("ERR ") {
                return Err(TransportError::Remote(message.to_string()));
            }
            if line.starts_with("version ") {
                continue;
            }

            let (refline, caps) = match line.split_once('\0') {
                Some((refline, caps)) => (refline, Some(caps)),
                None => (line, None),
            };
            if first {
                if let Some(caps) = caps {
                    adv.capabilities = caps.split_whitespace().map(str::to_string).collect();
                }
                first = false;
            }

            let (id, name) = refline
                .split_once(' ')
                .ok_or_else(|| TransportError::Protocol(format!("Malformed ref line {:?}", refline)))?;
            let id = ObjectId::from_hex(id)
                .map_err(|_| TransportError::Protocol(format!("Malformed ref id {:?}", id)))?;

            // empty repositories advertise capabilities on a placeholder ref
            if name == "capabilities^{}" || name.ends_with("^{}") {
                continue;
            }
            if name == "HEAD" {
                adv.head = Some(id);
            } else {
                adv.refs.push((name.to_string(), id));
            }
        }

        tracing::debug!(
            "Advertisement for {}: {} refs, capabilities [{}]",
            service,
            adv.refs.len(),
            adv.capabilities.join(" ")
        );
        Ok(adv)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap == name || cap.split_once('=').is_some_and(|(key, _)| key == name))
    }

    /// Values of `name=value` capabilities, in order
    pub fn capability_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.capabilities.iter().filter_map(move |cap| {
            cap.split_once('=')
                .and_then(|(key, value)| (key == name).then_some(value))
        })
    }

    pub fn resolve(&self, refname: &str) -> Option<ObjectId> {
        if refname == "HEAD" {
            return self.head;
        }
        self.refs
            .iter()
            .find(|(name, _)| name == refname)
            .map(|(_, id)| *id)
    }

    /// Branch `HEAD` points at: the `symref` capability, else the branch
    /// sharing `HEAD`'s id, else the first branch
    pub fn default_branch(&self) -> Option<(String, ObjectId)> {
        let branches = || self.refs.iter().filter(|(name, _)| name.starts_with(HEADS_PREFIX));

        for value in self.capability_values("symref") {
            if let Some(target) = value.strip_prefix("HEAD:") {
                if let Some(id) = self.resolve(target) {
                    return Some((target.to_string(), id));
                }
            }
        }
        if let Some(head) = self.head {
            if let Some((name, id)) = branches().find(|(_, id)| *id == head) {
                return Some((name.clone(), *id));
            }
        }
        branches().next().cloned()
    }
}

/// Full ref name for a branch given either way
pub fn branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("{}{}", HEADS_PREFIX, branch)
    }
}

/// `want` request for a full clone of `want`
pub fn upload_request(want: ObjectId, capabilities: &[String]) -> Result<Vec<u8>, TransportError> {
    let mut w = PktWriter::new();
    if capabilities.is_empty() {
        w.line(&format!("want {}", want))?;
    } else {
        w.line(&format!("want {} {}", want, capabilities.join(" ")))?;
    }
    w.flush();
    w.line("done")?;
    Ok(w.into_bytes())
}

/// Extract the pack from a `git-upload-pack` response
pub fn parse_upload_response(body: &[u8], sideband: bool) -> Result<Bytes, TransportError> {
    let mut reader = PktReader::new(body);

    loop {
        let packet = reader
            .next_packet()?
            .ok_or_else(|| TransportError::Protocol("Response ended before the pack".into()))?;
        let Some(line) = packet.as_text() else {
            continue;
        };
        if line == "NAK" || line.starts_with("ACK ") {
            break;
        }
        if let Some(message) = line.strip_prefix("ERR ") {
            return Err(TransportError::Remote(message.to_string()));
        }
        return Err(TransportError::Protocol(format!("Unexpected negotiation line {:?}", line)));
    }

    if !sideband {
        return Ok(Bytes::copy_from_slice(reader.remaining()));
    }

    let demuxed = demux_sideband(&mut reader)?;
    for message in &demuxed.progress {
        tracing::debug!("remote: {}", message);
    }
    if let Some(error) = demuxed.error {
        return Err(TransportError::Remote(error));
    }
    Ok(Bytes::from(demuxed.data))
}

/// Command list plus pack for `git-receive-pack`
pub fn receive_request(update: &RefUpdate, capabilities: &[String], pack: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut w = PktWriter::new();
    let command = format!("{} {} {}", update.old, update.new, update.refname);
    w.data(format!("{}\0{}\n", command, capabilities.join(" ")).as_bytes())?;
    w.flush();
    w.raw(pack);
    Ok(w.into_bytes())
}

/// Parsed `report-status` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportStatus {
    /// `None` when the remote unpacked successfully
    pub unpack_error: Option<String>,
    /// Per-ref outcome; `Err` holds the rejection reason
    pub refs: Vec<(String, Result<(), String>)>,
}

impl ReportStatus {
    /// Succeed only if the pack was unpacked and `refname` was accepted
    pub fn check(&self, refname: &str) -> Result<(), TransportError> {
        if let Some(error) = &self.unpack_error {
            return Err(TransportError::Remote(format!("unpack failed: {}", error)));
        }
        match self.refs.iter().find(|(name, _)| name == refname) {
            Some((_, Ok(()))) => Ok(()),
            Some((_, Err(reason))) => Err(TransportError::Rejected {
                refname: refname.to_string(),
                reason: reason.clone(),
            }),
            None => Err(TransportError::Protocol(format!("No status reported for {}", refname))),
        }
    }
}

/// Parse a `git-receive-pack` response carrying `report-status`
pub fn parse_report_status(body: &[u8], sideband: bool) -> Result<ReportStatus, TransportError> {
    let inner;
    let status_bytes = if sideband {
        let demuxed = demux_sideband(&mut PktReader::new(body))?;
        for message in &demuxed.progress {
            tracing::debug!("remote: {}", message);
        }
        if let Some(error) = demuxed.error {
            return Err(TransportError::Remote(error));
        }
        inner = demuxed.data;
        inner.as_slice()
    } else {
        body
    };

    let mut reader = PktReader::new(status_bytes);
    let mut report = ReportStatus::default();
    let mut saw_unpack = false;

    while let Some(packet) = reader.next_packet()? {
        let Some(line) = packet.as_text() else {
            if packet == Packet::Flush {
                break;
            }
            continue;
        };
        if let Some(result) = line.strip_prefix("unpack ") {
            saw_unpack = true;
            if result != "ok" {
                report.unpack_error = Some(result.to_string());
            }
        } else if let Some(refname) = line.strip_prefix("ok ") {
            report.refs.push((refname.to_string(), Ok(())));
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (refname, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            report.refs.push((refname.to_string(), Err(reason.to_string())));
        } else if let Some(message) = line.strip_prefix("ERR ") {
            return Err(TransportError::Remote(message.to_string()));
        } else {
            tracing::warn!("Ignoring unknown report-status line {:?}", line);
        }
    }

    if !saw_unpack {
        return Err(TransportError::Protocol("Missing unpack status".into()));
    }
    Ok(report)
}
