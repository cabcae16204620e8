//! Minimal Git smart-HTTP server over a tokio listener
//!
//! Serves one branch from an in-memory object store. Each connection handles a
//! single request and is closed afterwards.

use gistsync_core::{
    Commit, ObjectId, ObjectStore, PackWriter, Packet, PktReader, PktWriter, Signature, Tree, TreeEntry, unpack,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

pub const BRANCH: &str = "refs/heads/master";
const REPO_PATH: &str = "/gists/abc123.git/";
/// `Basic` credentials for johndoe / secret
const AUTHORIZATION: &str = "Basic am9obmRvZTpzZWNyZXQ=";

struct ServerState {
    store: ObjectStore,
    tip: ObjectId,
    requests: Vec<String>,
}

pub struct GitServer {
    pub url: String,
    state: Arc<Mutex<ServerState>>,
}

struct Response {
    status: u16,
    content_type: String,
    body: Vec<u8>,
}

impl Response {
    fn ok(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body,
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: message.as_bytes().to_vec(),
        }
    }
}

fn commit_files(store: &mut ObjectStore, parent: Option<ObjectId>, files: &[(&str, &[u8])]) -> ObjectId {
    let mut tree = match parent {
        Some(parent) => store.read_tree(&store.read_commit(&parent).unwrap().tree).unwrap(),
        None => Tree::new(),
    };
    for (name, data) in files {
        tree.insert(TreeEntry::file(*name, store.write_blob(data.to_vec())));
    }
    let tree_id = store.write_tree(&tree);
    let author = Signature::parse("Gist Owner <owner@example.com> 1500000000 +0000").unwrap();
    store.write_commit(&Commit::new(tree_id, parent.into_iter().collect(), author, ""))
}

impl GitServer {
    pub async fn start(files: &[(&str, &[u8])]) -> Self {
        let mut store = ObjectStore::new();
        let tip = commit_files(&mut store, None, files);
        let state = Arc::new(Mutex::new(ServerState {
            store,
            tip,
            requests: Vec::new(),
        }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, shared.clone()));
            }
        });

        Self {
            url: format!("http://{}{}", addr, REPO_PATH.trim_end_matches('/')),
            state,
        }
    }

    pub async fn tip(&self) -> ObjectId {
        self.state.lock().await.tip
    }

    pub async fn commit(&self, id: ObjectId) -> Commit {
        self.state.lock().await.store.read_commit(&id).unwrap()
    }

    /// Root file names of the tip tree
    pub async fn files_at_tip(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let commit = state.store.read_commit(&state.tip).unwrap();
        let tree = state.store.read_tree(&commit.tree).unwrap();
        tree.names().map(str::to_string).collect()
    }

    pub async fn blob_at_tip(&self, name: &str) -> Vec<u8> {
        let state = self.state.lock().await;
        let commit = state.store.read_commit(&state.tip).unwrap();
        let tree = state.store.read_tree(&commit.tree).unwrap();
        state.store.read_blob(&tree.get(name).unwrap().id).unwrap().to_vec()
    }

    /// Commit on top of the tip as another client would
    pub async fn advance(&self, files: &[(&str, &[u8])]) -> ObjectId {
        let mut state = self.state.lock().await;
        let parent = state.tip;
        state.tip = commit_files(&mut state.store, Some(parent), files);
        state.tip
    }

    /// `METHOD path` of every request served so far
    pub async fn requests(&self) -> Vec<String> {
        self.state.lock().await.requests.clone()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn handle(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let head_end = loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();

    let mut authorization = None;
    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "authorization" => authorization = Some(value.trim().to_string()),
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = &buf[head_end..head_end + content_length];

    let response = {
        let mut state = state.lock().await;
        state.requests.push(format!("{} {}", method, target));
        if authorization.as_deref() != Some(AUTHORIZATION) {
            Response::error(401, "authentication required")
        } else {
            route(&mut state, &method, &target, body)
        }
    };

    let reason = match response.status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Error",
    };
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason,
        response.content_type,
        response.body.len()
    );
    if response.status == 401 {
        out.push_str("WWW-Authenticate: Basic realm=\"gist\"\r\n");
    }
    out.push_str("\r\n");

    let _ = stream.write_all(out.as_bytes()).await;
    let _ = stream.write_all(&response.body).await;
    let _ = stream.shutdown().await;
}

fn route(state: &mut ServerState, method: &str, target: &str, body: &[u8]) -> Response {
    if !target.starts_with(REPO_PATH) {
        return Response::error(404, "repository not found");
    }
    match method {
        "GET" if target.ends_with("/info/refs?service=git-upload-pack") => advertise(
            state,
            "git-upload-pack",
            &format!(
                "{} HEAD\0side-band-64k ofs-delta symref=HEAD:{} agent=test-server",
                state.tip, BRANCH
            ),
        ),
        "GET" if target.ends_with("/info/refs?service=git-receive-pack") => advertise(
            state,
            "git-receive-pack",
            &format!("{} {}\0report-status delete-refs agent=test-server", state.tip, BRANCH),
        ),
        "POST" if target.ends_with("/git-upload-pack") => upload_pack(state),
        "POST" if target.ends_with("/git-receive-pack") => receive_pack(state, body),
        _ => Response::error(404, "not found"),
    }
}

fn advertise(state: &ServerState, service: &str, first_line: &str) -> Response {
    let mut w = PktWriter::new();
    w.line(&format!("# service={}", service)).unwrap();
    w.flush();
    w.line(first_line).unwrap();
    if service == "git-upload-pack" {
        w.line(&format!("{} {}", state.tip, BRANCH)).unwrap();
    }
    w.flush();
    Response::ok(&format!("application/x-{}-advertisement", service), w.into_bytes())
}

fn upload_pack(state: &ServerState) -> Response {
    let ids = state.store.reachable(&[state.tip]).unwrap();
    let pack = PackWriter::from_store(&state.store, &ids).unwrap().finish().unwrap();

    let mut w = PktWriter::new();
    w.line("NAK").unwrap();
    w.data(format!("\x02Enumerating objects: {}\n", ids.len()).as_bytes()).unwrap();
    for chunk in pack.chunks(1000) {
        let mut payload = vec![1u8];
        payload.extend_from_slice(chunk);
        w.data(&payload).unwrap();
    }
    w.flush();
    Response::ok("application/x-git-upload-pack-result", w.into_bytes())
}

fn receive_pack(state: &mut ServerState, body: &[u8]) -> Response {
    let mut reader = PktReader::new(body);
    let command = match reader.next_packet() {
        Ok(Some(packet @ Packet::Data(_))) => packet.as_text().unwrap_or_default().to_string(),
        _ => return Response::error(400, "missing command"),
    };
    if reader.next_packet() != Ok(Some(Packet::Flush)) {
        return Response::error(400, "missing flush");
    }
    let pack = reader.remaining();

    let command = command.split('\0').next().unwrap_or_default();
    let parts: Vec<&str> = command.split(' ').collect();
    let (old, new, refname) = (parts[0], parts[1], parts[2]);

    let mut w = PktWriter::new();
    let mut scratch = state.store.clone();
    if let Err(e) = unpack(pack, &mut scratch) {
        w.line(&format!("unpack {}", e)).unwrap();
        w.line(&format!("ng {} unpacker error", refname)).unwrap();
    } else if old != state.tip.to_hex() {
        w.line("unpack ok").unwrap();
        w.line(&format!("ng {} fetch first", refname)).unwrap();
    } else {
        w.line("unpack ok").unwrap();
        w.line(&format!("ok {}", refname)).unwrap();
        state.store = scratch;
        state.tip = ObjectId::from_hex(new).unwrap();
    }
    w.flush();
    Response::ok("application/x-git-receive-pack-result", w.into_bytes())
}
