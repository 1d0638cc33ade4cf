use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use crate::config::RudpFtConfig;
use crate::frame::{Frame, FrameKind};
use crate::receiver::session::{ReceiverSession, SessionSummary};
use crate::storage::SinkFactory;

pub enum AdmissionState {
    Idle,
    Active(Box<ReceiverSession>),
}

/// The receiver serves one sender at a time. This is the gate that binds a session to a peer on
///  START, turns everybody else away with BUSY, and releases the session when it completes or
///  goes idle.
pub struct AdmissionController {
    config: Arc<RudpFtConfig>,
    sink_factory: Arc<dyn SinkFactory>,
    state: AdmissionState,
    num_completed: usize,
    num_abandoned: usize,
    last_finished: Option<SessionSummary>,
}

impl AdmissionController {
    pub fn new(config: Arc<RudpFtConfig>, sink_factory: Arc<dyn SinkFactory>) -> AdmissionController {
        AdmissionController {
            config,
            sink_factory,
            state: AdmissionState::Idle,
            num_completed: 0,
            num_abandoned: 0,
            last_finished: None,
        }
    }

    pub fn state(&self) -> &AdmissionState {
        &self.state
    }

    pub fn active_session(&self) -> Option<&ReceiverSession> {
        match &self.state {
            AdmissionState::Idle => None,
            AdmissionState::Active(session) => Some(session),
        }
    }

    /// the summary of the session that ended most recently, successfully or not
    pub fn last_finished_session(&self) -> Option<&SessionSummary> {
        self.last_finished.as_ref()
    }

    pub fn num_completed_sessions(&self) -> usize {
        self.num_completed
    }

    pub fn num_abandoned_sessions(&self) -> usize {
        self.num_abandoned
    }

    fn record_finished(&mut self, summary: SessionSummary) {
        if summary.complete {
            self.num_completed += 1;
        }
        else {
            self.num_abandoned += 1;
        }
        self.last_finished = Some(summary);
    }

    /// Handles a frame from `from`, returning the frames to send back to `from`
    pub async fn on_frame(&mut self, from: SocketAddr, frame: Frame, now: Instant) -> Vec<Frame> {
        self.check_idle(now).await;

        let session = match &mut self.state {
            AdmissionState::Idle => return self.on_frame_idle(from, frame, now).await,
            AdmissionState::Active(session) => session,
        };

        if session.peer() != from {
            debug!("{:?} from {:?} while serving {:?} - BUSY", frame.kind, from, session.peer());
            return vec![Frame::busy()];
        }

        match frame.kind {
            // same name and size is a retransmitted START; anything else is a new transfer
            //  that supersedes the current one rather than being mixed into it
            FrameKind::Start => {
                if frame.destination_name() == session.destination_name() && frame.file_size == session.file_size() {
                    debug!("duplicate START from {:?} - confirming again", from);
                    session.touch(now);
                    return vec![Frame::start_ok()];
                }

                info!("{:?} starts a new transfer, replacing the one for {:?}", from, session.destination_name());
                self.release(now).await;
                self.on_frame_idle(from, frame, now).await
            }
            FrameKind::Data => {
                match session.on_data(frame, now).await {
                    Ok(replies) => {
                        self.finalize_if_done(now).await;
                        replies
                    }
                    Err(e) => {
                        error!("error writing {:?}: {} - abandoning the session", session.destination_name(), e);
                        self.abandon(now);
                        vec![]
                    }
                }
            }
            FrameKind::Fin => {
                debug!("FIN #{} from {:?}", frame.sequence, from);
                session.on_fin(&frame, now);
                self.finalize_if_done(now).await;
                vec![]
            }
            _ => {
                trace!("ignoring {:?} from {:?}", frame, from);
                vec![]
            }
        }
    }

    async fn on_frame_idle(&mut self, from: SocketAddr, frame: Frame, now: Instant) -> Vec<Frame> {
        match frame.kind {
            FrameKind::Start => {
                let destination_name = frame.destination_name();
                let sink = match self.sink_factory.open(&destination_name).await {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("cannot accept transfer of {:?} from {:?}: {}", destination_name, from, e);
                        return vec![];
                    }
                };

                let session = match ReceiverSession::new(from, destination_name, frame.file_size, sink, &self.config, now) {
                    Ok(session) => session,
                    Err(e) => {
                        error!("cannot set up a session for {:?}: {}", from, e);
                        return vec![];
                    }
                };
                info!("accepted transfer of {:?} ({} bytes) from {:?}", session.destination_name(), session.file_size(), from);
                self.state = AdmissionState::Active(Box::new(session));
                vec![Frame::start_ok()]
            }
            FrameKind::Data => {
                // the sender believes it has a session, but we dropped it
                debug!("DATA #{} from {:?} without a session - BUSY", frame.sequence, from);
                vec![Frame::busy()]
            }
            _ => {
                trace!("ignoring {:?} from {:?} without a session", frame, from);
                vec![]
            }
        }
    }

    /// Releases the active session if the sender has been silent for longer than the idle
    ///  timeout. A session that has all its bytes (but lost its FIN) counts as complete.
    pub async fn check_idle(&mut self, now: Instant) {
        let idle_timeout: Duration = self.config.idle_timeout;
        let is_idle = match &self.state {
            AdmissionState::Active(session) => session.is_idle(now, idle_timeout),
            AdmissionState::Idle => false,
        };
        if !is_idle {
            return;
        }

        warn!("no activity from the sender for {:?}", idle_timeout);
        self.release(now).await;
    }

    /// Ends the active session without a FIN: it counts as complete if all bytes are there,
    ///  and is abandoned otherwise
    async fn release(&mut self, now: Instant) {
        if let AdmissionState::Active(session) = std::mem::replace(&mut self.state, AdmissionState::Idle) {
            if session.is_complete() {
                info!("no FIN from {:?}, but all {} bytes are there", session.peer(), session.file_size());
                self.finish(*session, now).await;
            }
            else {
                let summary = session.abandon(now);
                self.record_finished(summary);
            }
        }
    }

    async fn finalize_if_done(&mut self, now: Instant) {
        let is_done = match &self.state {
            AdmissionState::Active(session) => session.fin_received() && session.is_complete(),
            AdmissionState::Idle => false,
        };
        if !is_done {
            return;
        }

        if let AdmissionState::Active(session) = std::mem::replace(&mut self.state, AdmissionState::Idle) {
            self.finish(*session, now).await;
        }
    }

    async fn finish(&mut self, session: ReceiverSession, now: Instant) {
        let destination_name = session.destination_name().to_string();
        match session.finish(now).await {
            Ok(summary) => self.record_finished(summary),
            Err(e) => error!("error closing {:?}: {}", destination_name, e),
        }
    }

    fn abandon(&mut self, now: Instant) {
        if let AdmissionState::Active(session) = std::mem::replace(&mut self.state, AdmissionState::Idle) {
            let summary = session.abandon(now);
            self.record_finished(summary);
        }
    }
}
