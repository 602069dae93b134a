//! The leader lifecycle state machine.
//!
//! One long-lived task per node owns all leader state: it discovers and
//! elects a leader among the configured peers, keeps leadership alive with
//! heartbeats, detects loss promptly, publishes transitions, and
//! periodically verifies the node's own membership so a silently-removed
//! node heals itself.
//!
//! Every mutation is serialized on the FSM task. Timer callbacks, peer
//! traffic, metadata events, API calls, and worker results all arrive as
//! messages; the helpers that wait on remote peers run as separate worker
//! tasks and report back with a single result message.

use crate::config::LeaderConfig;
use crate::elector;
use crate::membership;
use crate::status::{Incarnation, LeaderStatusBoard};
use crate::timers::{Backoff, TimerKind, TimerSet};
use crate::worker::{ElectionFailure, WorkerHandle, WorkerOutcome};
use chronicle_core::transport::{
    PeerInbound, PeerMessage, PeerTransport, VoteRejection, VoteReply, VoteRequest,
};
use chronicle_core::{
    Agent, ChronicleError, ClusterConfig, ClusterEvent, EventBus, HistoryId, InstanceId,
    LeaderInfo, LeaderStatus, Metadata, MetadataEvent, PeerId, Result, SystemState, Term,
};
use futures_util::future::{self, Either};
use futures_util::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// The states a node moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsmState {
    /// Not participating, or waiting out the randomized backoff before
    /// competing.
    Observer { electable: bool, removed: bool },
    /// Granted a vote in the current term; no leader known yet.
    VotedFor { peer: PeerId, since: Instant },
    /// An election worker is running on our behalf.
    Candidate,
    /// We lead.
    Leader { info: LeaderInfo },
    /// A remote leader is alive; we track it through its heartbeats.
    Follower { info: LeaderInfo },
    /// A membership probe is running on our behalf.
    CheckMember,
}

impl FsmState {
    fn name(&self) -> &'static str {
        match self {
            FsmState::Observer { .. } => "observer",
            FsmState::VotedFor { .. } => "voted-for",
            FsmState::Candidate => "candidate",
            FsmState::Leader { .. } => "leader",
            FsmState::Follower { .. } => "follower",
            FsmState::CheckMember => "check-member",
        }
    }
}

/// Our side of the heartbeat comparison: what we believe about the term we
/// last saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OurStatus {
    /// No active leader; the term is only a high-water mark.
    Inactive,
    Tentative,
    Established,
}

impl From<LeaderStatus> for OurStatus {
    fn from(status: LeaderStatus) -> Self {
        match status {
            LeaderStatus::Tentative => OurStatus::Tentative,
            LeaderStatus::Established => OurStatus::Established,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatVerdict {
    Accept,
    Reject(&'static str),
    /// Two established leaders met in one term number: a broken invariant,
    /// not a protocol situation.
    DualEstablished,
}

/// Heartbeat acceptance rules.
///
/// Identical terms always refresh. A strictly greater term number wins. At
/// equal numbers the contenders are ranked by status: an established leader
/// displaces anything short of another established leader, and a tentative
/// one is only accepted by a node with no leader at all.
fn evaluate_heartbeat(
    our_term: Term,
    our_status: OurStatus,
    incoming: &LeaderInfo,
) -> HeartbeatVerdict {
    if incoming.term == our_term {
        return HeartbeatVerdict::Accept;
    }
    match incoming.term.number.cmp(&our_term.number) {
        Ordering::Greater => HeartbeatVerdict::Accept,
        Ordering::Less => HeartbeatVerdict::Reject("stale term"),
        Ordering::Equal => match incoming.status {
            LeaderStatus::Established => {
                if our_status == OurStatus::Established {
                    HeartbeatVerdict::DualEstablished
                } else {
                    HeartbeatVerdict::Accept
                }
            }
            LeaderStatus::Tentative => {
                if our_status == OurStatus::Inactive {
                    HeartbeatVerdict::Accept
                } else {
                    HeartbeatVerdict::Reject("have leader")
                }
            }
        },
    }
}

/// Messages serialized onto the FSM task.
#[derive(Debug)]
enum FsmInput {
    Meta(MetadataEvent),
    Worker { generation: u64, outcome: WorkerOutcome },
    Api(ApiCall),
}

#[derive(Debug)]
enum ApiCall {
    NoteTermEstablished { history_id: HistoryId, term: Term },
    NoteTermFinished { history_id: HistoryId, term: Term },
    Announce,
    Sync(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// In-process client surface of the leader subsystem.
///
/// Cloneable and cheap; reads go straight to the published snapshot, and
/// everything else is queued onto the FSM task.
#[derive(Clone)]
pub struct LeaderHandle {
    board: Arc<LeaderStatusBoard>,
    tx: mpsc::UnboundedSender<FsmInput>,
}

impl LeaderHandle {
    /// The current established leader, if any.
    pub fn get_leader(&self) -> Option<(PeerId, (HistoryId, Term))> {
        self.board.get_leader()
    }

    /// Blocks until a leader distinct from `incarnation` is established, or
    /// fails with [`ChronicleError::NoLeader`] after `wait`.
    pub async fn wait_for_leader(
        &self,
        incarnation: Incarnation,
        wait: Duration,
    ) -> Result<(PeerId, (HistoryId, Term))> {
        self.board.wait_for_leader(incarnation, wait).await
    }

    /// Forces a re-publication of the current leader status.
    pub fn announce_leader_status(&self) {
        let _ = self.tx.send(FsmInput::Api(ApiCall::Announce));
    }

    /// Called by the proposer once the term has committed on a quorum.
    pub fn note_term_established(&self, history_id: HistoryId, term: Term) {
        let _ = self
            .tx
            .send(FsmInput::Api(ApiCall::NoteTermEstablished { history_id, term }));
    }

    /// Called by the proposer when it gives up on the term.
    pub fn note_term_finished(&self, history_id: HistoryId, term: Term) {
        let _ = self
            .tx
            .send(FsmInput::Api(ApiCall::NoteTermFinished { history_id, term }));
    }

    /// Flushes everything already queued to the FSM.
    pub async fn sync(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(FsmInput::Api(ApiCall::Sync(tx)))
            .map_err(|_| ChronicleError::internal("leader FSM is not running"))?;
        rx.await
            .map_err(|_| ChronicleError::internal("leader FSM stopped during sync"))
    }

    /// Stops the FSM, stepping down first if it leads.
    pub fn shutdown(&self) {
        let _ = self.tx.send(FsmInput::Api(ApiCall::Shutdown));
    }
}

/// The per-node leader state machine. Drive it with [`LeaderFsm::run`] on a
/// dedicated task; interact through the [`LeaderHandle`].
pub struct LeaderFsm<A, T> {
    config: LeaderConfig,
    agent: Arc<A>,
    transport: Arc<T>,
    board: Arc<LeaderStatusBoard>,
    bus_rx: Option<broadcast::Receiver<ClusterEvent>>,
    mailbox_tx: mpsc::UnboundedSender<FsmInput>,
    mailbox: mpsc::UnboundedReceiver<FsmInput>,
    inbound: mpsc::UnboundedReceiver<PeerInbound>,

    self_peer: PeerId,
    instance: InstanceId,
    history_id: HistoryId,
    established_term: Term,
    peers: HashSet<PeerId>,
    live: HashSet<PeerId>,
    electable: bool,
    removed: bool,

    state: FsmState,
    timers: TimerSet,
    backoff: Backoff,
    worker: Option<WorkerHandle>,
    worker_generation: u64,
    rng: StdRng,
}

impl<A, T> LeaderFsm<A, T>
where
    A: Agent + 'static,
    T: PeerTransport + 'static,
{
    pub fn new(
        self_peer: PeerId,
        config: LeaderConfig,
        agent: Arc<A>,
        transport: Arc<T>,
        bus: EventBus,
        inbound: mpsc::UnboundedReceiver<PeerInbound>,
    ) -> (Self, LeaderHandle) {
        let board = Arc::new(LeaderStatusBoard::new(bus.clone()));
        let (mailbox_tx, mailbox) = mpsc::unbounded_channel();
        let rng = match config.randomization_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let handle = LeaderHandle {
            board: Arc::clone(&board),
            tx: mailbox_tx.clone(),
        };
        let max_backoff = config.max_backoff;
        let fsm = Self {
            config,
            agent,
            transport,
            board,
            bus_rx: Some(bus.subscribe()),
            mailbox_tx,
            mailbox,
            inbound,
            self_peer,
            instance: InstanceId::nil(),
            history_id: HistoryId(Uuid::nil()),
            established_term: Term::genesis(),
            peers: HashSet::new(),
            live: HashSet::new(),
            electable: false,
            removed: false,
            state: FsmState::Observer {
                electable: false,
                removed: false,
            },
            timers: TimerSet::new(),
            backoff: Backoff::new(max_backoff),
            worker: None,
            worker_generation: 0,
            rng,
        };
        (fsm, handle)
    }

    /// Runs the state machine until shutdown or a fatal error.
    ///
    /// A fatal error means local state can no longer be trusted; the caller
    /// is expected to tear the process down and let a supervisor restart the
    /// subsystem from persisted state.
    pub async fn run(mut self) -> Result<()> {
        info!(peer = %self.self_peer, "starting leader FSM");
        self.spawn_event_pump();
        self.initialize().await?;

        loop {
            while let Some(kind) = self.timers.pop_due(Instant::now()) {
                self.handle_timer(kind);
            }
            let sleep = match self.timers.next_deadline() {
                Some(at) => Either::Left(tokio::time::sleep_until(at)),
                None => Either::Right(future::pending::<()>()),
            };
            tokio::select! {
                biased;
                input = self.mailbox.recv() => match input {
                    Some(input) => {
                        if self.dispatch(input).await? == Flow::Stop {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                message = self.inbound.recv() => match message {
                    Some(message) => self.handle_peer(message).await?,
                    None => {
                        info!("peer transport closed; stopping leader FSM");
                        return Ok(());
                    }
                },
                _ = sleep => {}
            }
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        self.agent.sync().await?;
        match self.agent.get_system_state().await? {
            SystemState::Provisioned(meta) => {
                self.removed = false;
                self.apply_metadata(&meta);
            }
            SystemState::Removed(meta) => {
                self.apply_metadata(&meta);
                self.removed = true;
                self.electable = false;
            }
            SystemState::JoiningCluster(meta) => {
                self.instance = meta.instance_id;
                self.history_id = meta.history_id;
                self.electable = false;
                self.removed = false;
            }
            SystemState::NotProvisioned => {
                return Err(ChronicleError::UnexpectedSystemState {
                    details: "agent reports no cluster state".into(),
                });
            }
        }

        self.live = self.transport.live_peers();
        for peer in self.peers.difference(&self.live) {
            self.transport.connect(*peer);
        }

        self.enter(self.observer_state());
        Ok(())
    }

    fn spawn_event_pump(&mut self) {
        let Some(mut rx) = self.bus_rx.take() else {
            return;
        };
        let tx = self.mailbox_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ClusterEvent::Metadata(event)) => {
                        if tx.send(FsmInput::Meta(event)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "metadata event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // ---- state entry ----

    fn enter(&mut self, next: FsmState) {
        if let FsmState::Leader { info } = self.state {
            if !matches!(next, FsmState::Leader { .. }) {
                info!(term = %info.term, "stepping down");
                self.broadcast_live(PeerMessage::SteppingDown(info));
            }
        }

        let from = self.state.name();
        self.state = next;
        debug!(from, to = self.state.name(), "state transition");

        self.board.publish(self.current_leader_info());

        self.timers.cancel(TimerKind::State);
        self.timers.cancel(TimerKind::SendHeartbeat);
        self.kill_worker();

        match self.state {
            FsmState::Observer {
                electable: true,
                removed: false,
            } => {
                let wait = self.observer_wait();
                self.timers.schedule(TimerKind::State, wait);
            }
            FsmState::Observer { .. } => {}
            FsmState::VotedFor { .. } | FsmState::Follower { .. } => {
                self.timers
                    .schedule(TimerKind::State, self.config.follower_timeout());
            }
            FsmState::Candidate => {
                self.timers
                    .schedule(TimerKind::State, self.config.candidate_timeout());
            }
            FsmState::CheckMember => {
                self.timers
                    .schedule(TimerKind::State, self.config.check_member_timeout);
            }
            FsmState::Leader { .. } => {
                self.timers.schedule(TimerKind::SendHeartbeat, Duration::ZERO);
            }
        }

        if matches!(
            self.state,
            FsmState::Leader { .. } | FsmState::Follower { .. } | FsmState::VotedFor { .. }
        ) {
            self.backoff.reset();
        }

        match self.state {
            FsmState::Leader { .. }
            | FsmState::Follower { .. }
            | FsmState::CheckMember
            | FsmState::Observer { removed: true, .. } => {
                self.timers.cancel(TimerKind::CheckMember);
            }
            _ => {
                self.timers
                    .schedule(TimerKind::CheckMember, self.config.check_member_after);
            }
        }

        match self.state {
            FsmState::Candidate => self.spawn_election(),
            FsmState::CheckMember => self.spawn_membership_check(),
            _ => {}
        }
    }

    fn observer_state(&self) -> FsmState {
        FsmState::Observer {
            electable: self.electable && !self.removed,
            removed: self.removed,
        }
    }

    fn current_leader_info(&self) -> Option<LeaderInfo> {
        match self.state {
            FsmState::Leader { info } | FsmState::Follower { info } => Some(info),
            _ => None,
        }
    }

    fn observer_wait(&mut self) -> Duration {
        let h = self.config.heartbeat_interval;
        let upper = u64::from(self.config.observer_multiplier)
            * u64::from(self.backoff.factor())
            * h.as_millis() as u64;
        h + Duration::from_millis(self.rng.gen_range(1..=upper.max(1)))
    }

    fn broadcast_live(&self, message: PeerMessage) {
        for peer in self.peers.intersection(&self.live) {
            self.transport.send(*peer, message.clone());
        }
    }

    // ---- metadata ----

    fn apply_metadata(&mut self, meta: &Metadata) {
        self.instance = meta.instance_id;
        self.history_id = meta.history_id;
        if meta.term.number >= self.established_term.number {
            self.established_term = meta.term;
        }
        self.apply_config(&meta.config);
    }

    fn apply_config(&mut self, config: &ClusterConfig) {
        self.peers = config
            .members
            .keys()
            .copied()
            .filter(|p| *p != self.self_peer)
            .collect();
        self.electable = !self.removed && config.electable(self.self_peer, self.instance);
    }

    fn handle_metadata(&mut self, event: MetadataEvent) {
        match event {
            MetadataEvent::SystemProvisioned { meta } => {
                info!("provisioned as a cluster member");
                self.removed = false;
                self.apply_metadata(&meta);
                self.enter(self.observer_state());
            }
            MetadataEvent::SystemRemoved { meta } => {
                warn!("removed from the cluster");
                self.apply_metadata(&meta);
                self.removed = true;
                self.electable = false;
                // A leader keeps its state; the proposer ends the term and
                // note_term_finished takes us to observer.
                if !matches!(self.state, FsmState::Leader { .. }) {
                    self.enter(self.observer_state());
                }
            }
            MetadataEvent::NewHistory { history_id, meta } => {
                info!(history = %history_id, "log branched into a new history");
                self.apply_metadata(&meta);
                self.history_id = history_id;
                self.enter(self.observer_state());
            }
            MetadataEvent::TermEstablished { term } => {
                if term.number >= self.established_term.number {
                    self.established_term = term;
                }
            }
            MetadataEvent::NewConfig { config, meta } => {
                let was_electable = self.electable;
                self.instance = meta.instance_id;
                self.apply_config(&config);
                if self.electable != was_electable {
                    debug!(
                        electable = self.electable,
                        "configuration change flipped electability"
                    );
                    if !matches!(self.state, FsmState::Leader { .. }) {
                        self.enter(self.observer_state());
                    }
                }
            }
        }
    }

    // ---- peer traffic ----

    async fn handle_peer(&mut self, message: PeerInbound) -> Result<()> {
        match message {
            PeerInbound::Heartbeat { from: _, info } => self.handle_heartbeat(info)?,
            PeerInbound::SteppingDown { from, info } => {
                if let FsmState::Follower { info: ours } = self.state {
                    if ours.leader == from {
                        info!(leader = %from, term = %info.term, "leader stepped down");
                        self.enter(self.observer_state());
                    }
                }
            }
            PeerInbound::VoteRequest {
                from: _,
                request,
                reply,
            } => self.handle_vote_request(request, reply).await?,
            PeerInbound::MembershipQuery { from, query, reply } => {
                trace!(%from, peer = %query.peer, "answering membership query");
                let answer = self
                    .agent
                    .check_member(query.history_id, query.peer, query.instance_id, query.high_seqno)
                    .await;
                let _ = reply.send(answer);
            }
            PeerInbound::PeerUp(peer) => {
                debug!(%peer, "peer up");
                self.live.insert(peer);
            }
            PeerInbound::PeerDown(peer) => {
                debug!(%peer, "peer down");
                self.live.remove(&peer);
                match self.state {
                    FsmState::Follower { info } if info.leader == peer => {
                        warn!(leader = %peer, "leader disconnected");
                        self.enter(self.observer_state());
                    }
                    FsmState::VotedFor { peer: voted, .. } if voted == peer => {
                        debug!(candidate = %peer, "vote recipient disconnected");
                        self.enter(self.observer_state());
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn handle_heartbeat(&mut self, info: LeaderInfo) -> Result<()> {
        if info.history_id != self.history_id {
            trace!(leader = %info.leader, theirs = %info.history_id, "dropping heartbeat from another history");
            return Ok(());
        }
        let (our_term, our_status) = match self.state {
            FsmState::Leader { info } | FsmState::Follower { info } => {
                (info.term, OurStatus::from(info.status))
            }
            _ => (self.established_term, OurStatus::Inactive),
        };
        match evaluate_heartbeat(our_term, our_status, &info) {
            HeartbeatVerdict::Accept => {
                trace!(leader = %info.leader, term = %info.term, "accepting heartbeat");
                self.enter(FsmState::Follower { info });
            }
            HeartbeatVerdict::Reject(reason) => {
                trace!(leader = %info.leader, term = %info.term, reason, "rejecting heartbeat");
            }
            HeartbeatVerdict::DualEstablished => {
                error!(ours = %our_term, theirs = %info.term, "two established leaders in one term");
                return Err(ChronicleError::invariant(format!(
                    "established leaders {} and {} share term number {} in history {}",
                    self.self_peer, info.leader, info.term.number, info.history_id
                )));
            }
        }
        Ok(())
    }

    async fn handle_vote_request(
        &mut self,
        request: VoteRequest,
        reply: oneshot::Sender<VoteReply>,
    ) -> Result<()> {
        let reason = match self.state {
            FsmState::Candidate => VoteRejection::InElection,
            FsmState::CheckMember => VoteRejection::CheckingMembership,
            FsmState::Leader { info } | FsmState::Follower { info } => {
                VoteRejection::HaveLeader { info }
            }
            FsmState::Observer { .. } | FsmState::VotedFor { .. } => {
                match self
                    .agent
                    .check_grant_vote(request.history_id, request.position)
                    .await
                {
                    Ok(()) => {
                        info!(candidate = %request.candidate, "granting vote");
                        let _ = reply.send(VoteReply::Granted {
                            latest_term: self.established_term,
                        });
                        self.enter(FsmState::VotedFor {
                            peer: request.candidate,
                            since: Instant::now(),
                        });
                        return Ok(());
                    }
                    Err(e) => {
                        debug!(candidate = %request.candidate, error = %e, "agent refused vote grant");
                        VoteRejection::NotGranted
                    }
                }
            }
        };
        debug!(candidate = %request.candidate, ?reason, "withholding vote");
        let _ = reply.send(VoteReply::Rejected { reason });
        Ok(())
    }

    // ---- timers ----

    fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::State => match self.state {
                FsmState::Observer {
                    electable: true,
                    removed: false,
                } => {
                    info!("observer wait elapsed; starting election");
                    self.enter(FsmState::Candidate);
                }
                FsmState::Observer { .. } => {}
                FsmState::VotedFor { peer, .. } => {
                    debug!(candidate = %peer, "no leader emerged after voting");
                    self.enter(self.observer_state());
                }
                FsmState::Follower { info } => {
                    warn!(leader = %info.leader, "leader went silent");
                    self.enter(self.observer_state());
                }
                FsmState::Candidate => {
                    warn!("election timed out");
                    self.backoff.double();
                    self.enter(self.observer_state());
                }
                FsmState::CheckMember => {
                    warn!("membership check timed out");
                    self.enter(self.observer_state());
                }
                FsmState::Leader { .. } => {}
            },
            TimerKind::SendHeartbeat => {
                if let FsmState::Leader { info } = self.state {
                    self.broadcast_live(PeerMessage::Heartbeat(info));
                    self.timers
                        .schedule(TimerKind::SendHeartbeat, self.config.heartbeat_interval);
                }
            }
            TimerKind::CheckMember => match self.state {
                FsmState::Observer { removed: false, .. } => {
                    debug!("verifying our cluster membership");
                    self.enter(FsmState::CheckMember);
                }
                FsmState::Leader { .. }
                | FsmState::Follower { .. }
                | FsmState::CheckMember
                | FsmState::Observer { .. } => {}
                FsmState::VotedFor { .. } | FsmState::Candidate => {
                    // Busy with an election round; come back later.
                    self.timers
                        .schedule(TimerKind::CheckMember, self.config.check_member_after);
                }
            },
        }
    }

    // ---- workers ----

    fn kill_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.kill();
        }
    }

    fn spawn_election(&mut self) {
        self.worker_generation += 1;
        let generation = self.worker_generation;
        let agent = Arc::clone(&self.agent);
        let transport = Arc::clone(&self.transport);
        let extra_wait = self.config.extra_wait_time;
        let tx = self.mailbox_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome =
                match AssertUnwindSafe(elector::run_election(agent, transport, extra_wait))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => WorkerOutcome::ElectionLost {
                        reason: ElectionFailure::WorkerCrashed,
                    },
                };
            let _ = tx.send(FsmInput::Worker { generation, outcome });
        });
        self.worker = Some(WorkerHandle { handle, generation });
    }

    fn spawn_membership_check(&mut self) {
        self.worker_generation += 1;
        let generation = self.worker_generation;
        let agent = Arc::clone(&self.agent);
        let transport = Arc::clone(&self.transport);
        let tx = self.mailbox_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome =
                match AssertUnwindSafe(membership::run_membership_check(agent, transport))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("membership check crashed");
                        WorkerOutcome::MembershipConfirmed
                    }
                };
            let _ = tx.send(FsmInput::Worker { generation, outcome });
        });
        self.worker = Some(WorkerHandle { handle, generation });
    }

    async fn handle_worker(&mut self, generation: u64, outcome: WorkerOutcome) -> Result<()> {
        if self.worker.as_ref().map(|w| w.generation) != Some(generation) {
            debug!(generation, ?outcome, "discarding result from a superseded worker");
            return Ok(());
        }
        self.worker = None;

        match outcome {
            WorkerOutcome::ElectionWon { history_id, term } => {
                if history_id != self.history_id {
                    debug!(history = %history_id, "discarding election won in an old history");
                    self.enter(self.observer_state());
                    return Ok(());
                }
                let term = term.next(self.self_peer);
                let info = LeaderInfo {
                    leader: self.self_peer,
                    history_id,
                    term,
                    status: LeaderStatus::Tentative,
                };
                info!(%term, "election won; leading tentatively");
                self.enter(FsmState::Leader { info });
            }
            WorkerOutcome::ElectionLost { reason } => {
                info!(%reason, "election failed; backing off");
                self.backoff.double();
                self.enter(self.observer_state());
            }
            WorkerOutcome::MembershipConfirmed => {
                self.enter(self.observer_state());
            }
            WorkerOutcome::MembershipRevoked { reported_by } => {
                warn!(%reported_by, "no longer a cluster member; marking local state removed");
                if let Err(e) = self.agent.mark_removed(self.self_peer, self.instance).await {
                    error!(error = %e, "failed to persist removal");
                }
                self.removed = true;
                self.electable = false;
                self.enter(self.observer_state());
            }
        }
        Ok(())
    }

    // ---- api ----

    async fn dispatch(&mut self, input: FsmInput) -> Result<Flow> {
        match input {
            FsmInput::Meta(event) => {
                self.handle_metadata(event);
                Ok(Flow::Continue)
            }
            FsmInput::Worker { generation, outcome } => {
                self.handle_worker(generation, outcome).await?;
                Ok(Flow::Continue)
            }
            FsmInput::Api(call) => Ok(self.handle_api(call)),
        }
    }

    fn handle_api(&mut self, call: ApiCall) -> Flow {
        match call {
            ApiCall::NoteTermEstablished { history_id, term } => {
                if let FsmState::Leader { info } = self.state {
                    if info.history_id == history_id
                        && info.term == term
                        && info.status == LeaderStatus::Tentative
                    {
                        info!(%term, "term established; leadership now visible");
                        if term.number >= self.established_term.number {
                            self.established_term = term;
                        }
                        self.enter(FsmState::Leader {
                            info: LeaderInfo {
                                status: LeaderStatus::Established,
                                ..info
                            },
                        });
                        return Flow::Continue;
                    }
                }
                debug!(%term, "ignoring stale term-established notice");
            }
            ApiCall::NoteTermFinished { history_id, term } => {
                if let FsmState::Leader { info } = self.state {
                    if info.history_id == history_id && info.term == term {
                        info!(%term, "proposer finished the term");
                        self.enter(self.observer_state());
                        return Flow::Continue;
                    }
                }
                debug!(%term, "ignoring stale term-finished notice");
            }
            ApiCall::Announce => self.board.announce(),
            ApiCall::Sync(done) => {
                let _ = done.send(());
            }
            ApiCall::Shutdown => {
                info!("shutting down leader FSM");
                if let FsmState::Leader { info } = self.state {
                    self.broadcast_live(PeerMessage::SteppingDown(info));
                }
                self.kill_worker();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(number: u64, hint: PeerId) -> Term {
        Term { number, hint }
    }

    fn heartbeat(number: u64, hint: PeerId, status: LeaderStatus) -> LeaderInfo {
        LeaderInfo {
            leader: hint,
            history_id: HistoryId::from(1),
            term: term(number, hint),
            status,
        }
    }

    #[test]
    fn identical_term_refreshes() {
        let a = PeerId::from(1);
        let hb = heartbeat(3, a, LeaderStatus::Tentative);
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Tentative, &hb),
            HeartbeatVerdict::Accept
        );
    }

    #[test]
    fn status_upgrade_in_same_term_is_accepted() {
        let a = PeerId::from(1);
        let hb = heartbeat(3, a, LeaderStatus::Established);
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Tentative, &hb),
            HeartbeatVerdict::Accept
        );
    }

    #[test]
    fn greater_term_number_always_wins() {
        let (a, b) = (PeerId::from(1), PeerId::from(2));
        let hb = heartbeat(5, b, LeaderStatus::Tentative);
        assert_eq!(
            evaluate_heartbeat(term(4, a), OurStatus::Established, &hb),
            HeartbeatVerdict::Accept
        );
    }

    #[test]
    fn smaller_term_number_is_stale() {
        let (a, b) = (PeerId::from(1), PeerId::from(2));
        let hb = heartbeat(2, b, LeaderStatus::Established);
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Inactive, &hb),
            HeartbeatVerdict::Reject("stale term")
        );
    }

    #[test]
    fn established_contender_displaces_tentative_holder() {
        let (a, b) = (PeerId::from(1), PeerId::from(2));
        let hb = heartbeat(3, b, LeaderStatus::Established);
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Tentative, &hb),
            HeartbeatVerdict::Accept
        );
    }

    #[test]
    fn tentative_contender_needs_an_inactive_receiver() {
        let (a, b) = (PeerId::from(1), PeerId::from(2));
        let hb = heartbeat(3, b, LeaderStatus::Tentative);
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Inactive, &hb),
            HeartbeatVerdict::Accept
        );
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Tentative, &hb),
            HeartbeatVerdict::Reject("have leader")
        );
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Established, &hb),
            HeartbeatVerdict::Reject("have leader")
        );
    }

    #[test]
    fn two_established_leaders_in_one_term_is_fatal() {
        let (a, b) = (PeerId::from(1), PeerId::from(2));
        let hb = heartbeat(3, b, LeaderStatus::Established);
        assert_eq!(
            evaluate_heartbeat(term(3, a), OurStatus::Established, &hb),
            HeartbeatVerdict::DualEstablished
        );
    }
}
