use async_trait::async_trait;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::VecDeque;
use std::io::{BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::PlaybackError;
use crate::icy::{metaint_from_headers, IcyDemuxer};
use crate::station::Station;

const CHANNELS: u16 = 2;
const SAMPLE_RATE: u32 = 44100;

/// Opens audio resources. Only the playback engine calls this.
#[async_trait(?Send)]
pub trait AudioBackend {
    type Handle: AudioHandle;

    /// Resolves once the stream is producing audio at `gain` (0.0..=1.0).
    async fn open(&self, station: &Station, gain: f32) -> Result<Self::Handle, PlaybackError>;
}

/// One live audio resource.
pub trait AudioHandle {
    fn set_gain(&self, gain: f32);

    /// Latest in-stream title tag, `None` until the stream sends one.
    fn stream_title(&self) -> watch::Receiver<Option<String>>;

    /// Stops audio and frees the resource. Safe to call more than once.
    fn close(&mut self);
}

/// HTTP stream -> ICY demux -> ffmpeg -> rodio.
pub struct FfmpegBackend {
    client: reqwest::Client,
    ffmpeg_path: String,
    connect_timeout: Duration,
    stream_handle: OutputStreamHandle,
    _stream: OutputStream, // must keep alive or audio stops
}

impl FfmpegBackend {
    pub fn new(
        client: reqwest::Client,
        ffmpeg_path: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, PlaybackError> {
        let (stream, stream_handle) = OutputStream::try_default().map_err(|e| {
            PlaybackError::Output(format!("{}. Check your audio drivers.", e))
        })?;

        Ok(Self {
            client,
            ffmpeg_path: ffmpeg_path.into(),
            connect_timeout,
            stream_handle,
            _stream: stream,
        })
    }

    fn spawn_ffmpeg(&self) -> std::io::Result<Child> {
        Command::new(&self.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg("pipe:0")
            .arg("-f")
            .arg("s16le")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }
}

#[async_trait(?Send)]
impl AudioBackend for FfmpegBackend {
    type Handle = FfmpegStream;

    async fn open(&self, station: &Station, gain: f32) -> Result<FfmpegStream, PlaybackError> {
        let fail = |reason: String| PlaybackError::stream_open(station.id, reason);

        let (response, metaint) = connect(&self.client, station).await?;

        let mut child = self
            .spawn_ffmpeg()
            .map_err(|e| fail(format!("failed to spawn ffmpeg: {}. Is ffmpeg installed?", e)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(child);
            return Err(fail("failed to capture ffmpeg pipes".to_string()));
        };

        let (title_tx, title_rx) = watch::channel(None);
        let (audio_tx, audio_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(32);
        spawn_stdin_writer(stdin, audio_rx);

        // from here on, an early return or a dropped open() tears everything down
        let pipeline = Pipeline {
            child: Some(child),
            feeder: tokio::spawn(feed_stream(response, metaint, audio_tx, title_tx)),
        };

        let (pcm_tx, pcm_rx) = mpsc::sync_channel::<Vec<i16>>(10);
        let (ready_tx, ready_rx) = oneshot::channel();
        spawn_pcm_reader(stdout, pcm_tx, ready_tx);

        match tokio::time::timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(true)) => {}
            Err(_) => return Err(fail("timed out waiting for audio".to_string())),
            Ok(_) => {
                return Err(fail(
                    "stream ended before any audio was decoded".to_string(),
                ))
            }
        }

        let sink = Sink::try_new(&self.stream_handle).map_err(|e| {
            PlaybackError::Output(format!("failed to create audio sink: {}", e))
        })?;
        sink.set_volume(gain);
        sink.append(FfmpegSource::new(pcm_rx, CHANNELS, SAMPLE_RATE));

        Ok(FfmpegStream {
            pipeline: Some(pipeline),
            sink,
            title_rx,
        })
    }
}

/// Requests `station`'s stream with ICY metadata enabled.
///
/// Returns the live response and its `icy-metaint`, or `StreamOpen` on a
/// transport failure or non-success status.
async fn connect(
    client: &reqwest::Client,
    station: &Station,
) -> Result<(reqwest::Response, Option<usize>), PlaybackError> {
    let response = client
        .get(&station.stream_url)
        .header("Icy-MetaData", "1")
        .send()
        .await
        .map_err(|e| PlaybackError::stream_open(station.id, e.to_string()))?;

    if !response.status().is_success() {
        return Err(PlaybackError::stream_open(
            station.id,
            format!("HTTP {}", response.status()),
        ));
    }

    let metaint = metaint_from_headers(response.headers());
    tracing::debug!(station = %station.id, ?metaint, "stream connected");
    Ok((response, metaint))
}

/// The ffmpeg child and the task feeding it. Dropping it stops both.
struct Pipeline {
    child: Option<Child>,
    feeder: JoinHandle<()>,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.feeder.abort();
        if let Some(child) = self.child.take() {
            reap(child);
        }
    }
}

pub struct FfmpegStream {
    pipeline: Option<Pipeline>,
    sink: Sink,
    title_rx: watch::Receiver<Option<String>>,
}

impl AudioHandle for FfmpegStream {
    fn set_gain(&self, gain: f32) {
        self.sink.set_volume(gain);
    }

    fn stream_title(&self) -> watch::Receiver<Option<String>> {
        self.title_rx.clone()
    }

    fn close(&mut self) {
        self.sink.stop();
        self.pipeline = None;
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Kills `child` and collects its exit status off the async workers.
fn reap(mut child: Child) {
    let _ = child.kill();
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(move || {
                let _ = child.wait();
            });
        }
        Err(_) => {
            let _ = child.wait();
        }
    }
}

/// Reads the HTTP body, strips ICY blocks, forwards audio to ffmpeg's stdin.
async fn feed_stream(
    mut response: reqwest::Response,
    metaint: Option<usize>,
    audio_tx: tokio::sync::mpsc::Sender<Vec<u8>>,
    title_tx: watch::Sender<Option<String>>,
) {
    let mut demux = IcyDemuxer::new(metaint);
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                tracing::info!("stream ended");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream read failed");
                break;
            }
        };

        let mut audio = Vec::with_capacity(chunk.len());
        if let Some(title) = demux.feed(&chunk, &mut audio) {
            tracing::debug!(%title, "stream title");
            title_tx.send_replace(Some(title));
        }
        if !audio.is_empty() && audio_tx.send(audio).await.is_err() {
            break;
        }
    }
}

fn spawn_stdin_writer(mut stdin: ChildStdin, mut rx: tokio::sync::mpsc::Receiver<Vec<u8>>) {
    thread::spawn(move || {
        while let Some(chunk) = rx.blocking_recv() {
            if stdin.write_all(&chunk).is_err() {
                break;
            }
        }
    });
}

fn spawn_pcm_reader(
    stdout: std::process::ChildStdout,
    tx: mpsc::SyncSender<Vec<i16>>,
    ready: oneshot::Sender<bool>,
) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut buf = [0u8; 8192];
        let mut ready = Some(ready);

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(r) = ready.take() {
                        let _ = r.send(true);
                    }
                    let samples = buf[..n - n % 2]
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]]))
                        .collect::<Vec<_>>();

                    if tx.send(samples).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        if let Some(r) = ready.take() {
            let _ = r.send(false);
        }
    });
}

struct FfmpegSource {
    rx: mpsc::Receiver<Vec<i16>>,
    buffer: VecDeque<i16>,
    channels: u16,
    sample_rate: u32,
}

impl FfmpegSource {
    fn new(rx: mpsc::Receiver<Vec<i16>>, channels: u16, sample_rate: u32) -> Self {
        FfmpegSource {
            rx,
            buffer: VecDeque::with_capacity(8192),
            channels,
            sample_rate,
        }
    }
}

impl Iterator for FfmpegSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(s) = self.buffer.pop_front() {
                return Some(s as f32 / 32768.0);
            }

            match self.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => self.buffer.extend(chunk),
                // underrun: emit silence rather than ending the source
                Err(mpsc::RecvTimeoutError::Timeout) => return Some(0.0),
                Err(mpsc::RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl Source for FfmpegSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }
    fn channels(&self) -> u16 {
        self.channels
    }
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn total_duration(&self) -> Option<Duration> {
        None // live stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::StationId;

    #[test]
    fn source_converts_samples_and_ends_on_disconnect() {
        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(vec![0, 16384, -32768]).unwrap();
        drop(tx);

        let source = FfmpegSource::new(rx, CHANNELS, SAMPLE_RATE);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 44100);
        assert!(source.total_duration().is_none());

        let samples: Vec<f32> = source.collect();
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    async fn serve_once(reply: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/stream", addr)
    }

    fn station(url: String) -> Station {
        Station {
            id: StationId::Delta,
            stream_url: url,
            now_playing_url: None,
        }
    }

    #[tokio::test]
    async fn error_status_is_a_stream_open_error() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let err = connect(&reqwest::Client::new(), &station(url))
            .await
            .unwrap_err();
        match err {
            PlaybackError::StreamOpen { station, reason } => {
                assert_eq!(station, StationId::Delta);
                assert!(reason.contains("503"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_a_stream_open_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&reqwest::Client::new(), &station(format!("http://{}/", addr)))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::StreamOpen { .. }));
    }

    #[tokio::test]
    async fn connect_reads_metaint() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nicy-metaint: 16000\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let (response, metaint) = connect(&reqwest::Client::new(), &station(url))
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(metaint, Some(16000));
    }

    #[tokio::test]
    async fn dropping_the_pipeline_stops_the_feeder() {
        let feeder = tokio::spawn(std::future::pending::<()>());
        let handle = feeder.abort_handle();
        drop(Pipeline {
            child: None,
            feeder,
        });
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(handle.is_finished());
    }

    #[test]
    fn source_fills_underruns_with_silence() {
        let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(4);
        let mut source = FfmpegSource::new(rx, CHANNELS, SAMPLE_RATE);
        assert_eq!(source.next(), Some(0.0));
        drop(tx);
        assert_eq!(source.next(), None);
    }
}
