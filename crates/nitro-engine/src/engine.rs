//! The engine: a single task that owns the store and drives every objective.

use crate::chain::ChainService;
use crate::config::{EngineConfig, Escalation};
use crate::error::{EngineError, Result};
use crate::events::{
    ledger_info_from_channel, ledger_info_from_consensus, payment_info, ChannelStatus, EngineEvent,
    Notifier,
};
use crate::messaging::MessageService;
use crate::outbox::Outbox;
use crate::payments::PaymentManager;
use crate::policy::PolicyMaker;
use nitro_channel::{ConsensusChannel, Proposal, SignedProposal};
use nitro_crypto::SecretKey;
use nitro_protocols::{
    ChainEvent, DirectDefundObjective, DirectFundObjective, Message, Objective, ObjectiveId,
    ObjectiveKind, ObjectivePayload, ObjectiveRequest, ObjectiveStatus, ProtocolError, SideEffects,
    VirtualDefundObjective, VirtualFundObjective, Voucher, WaitingFor,
};
use nitro_store::Store;
use nitro_types::{Address, Amount, ChannelId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// The collaborators an engine runs against.
pub struct EngineServices {
    /// Durable state.
    pub store: Arc<dyn Store>,
    /// The adjudicator.
    pub chain: Arc<dyn ChainService>,
    /// Outbound peer messages.
    pub messages: Arc<dyn MessageService>,
    /// Inbound peer messages.
    pub inbound: mpsc::Receiver<Message>,
    /// Approval of objectives started by peers.
    pub policy: Arc<dyn PolicyMaker>,
    /// Voucher bookkeeping.
    pub payments: Arc<dyn PaymentManager>,
}

struct ObjectiveCommand {
    request: ObjectiveRequest,
    respond: oneshot::Sender<Result<ObjectiveId>>,
}

struct PaymentCommand {
    channel_id: ChannelId,
    amount: Amount,
    respond: oneshot::Sender<Result<Voucher>>,
}

enum Input {
    Objective(ObjectiveCommand),
    Payment(PaymentCommand),
    Chain(std::result::Result<ChainEvent, RecvError>),
    Message(Message),
    Proposal(Proposal),
}

/// API access to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    address: Address,
    objective_requests: mpsc::Sender<ObjectiveCommand>,
    payment_requests: mpsc::Sender<PaymentCommand>,
    events: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// The node's address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Starts an objective and returns its id once it is created.
    ///
    /// Construction failures, such as a duplicate objective or a missing ledger, are
    /// returned here rather than stopping the engine.
    pub async fn create_objective(&self, request: ObjectiveRequest) -> Result<ObjectiveId> {
        let (respond, response) = oneshot::channel();
        self.objective_requests
            .send(ObjectiveCommand { request, respond })
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)?
    }

    /// Pays `amount` through a virtual channel and returns the voucher sent to the payee.
    pub async fn pay(&self, channel_id: ChannelId, amount: Amount) -> Result<Voucher> {
        let (respond, response) = oneshot::channel();
        self.payment_requests
            .send(PaymentCommand {
                channel_id,
                amount,
                respond,
            })
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)?
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Asks the engine to stop after the input it is handling.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("address", &self.address)
            .finish()
    }
}

/// Drives objectives to completion.
///
/// The engine handles one input at a time: API requests, chain events, peer messages
/// and the ledger proposals its own objectives hand back. Every input ends in
/// [`attempt_progress`](Engine::attempt_progress) on the objectives it touched.
pub struct Engine {
    config: EngineConfig,
    address: Address,
    secret_key: SecretKey,
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainService>,
    policy: Arc<dyn PolicyMaker>,
    payments: Arc<dyn PaymentManager>,
    outbox: Outbox,
    notifier: Notifier,

    inbound: mpsc::Receiver<Message>,
    chain_events: broadcast::Receiver<ChainEvent>,
    chain_open: bool,
    objective_requests: mpsc::Receiver<ObjectiveCommand>,
    payment_requests: mpsc::Receiver<PaymentCommand>,
    proposals_tx: mpsc::UnboundedSender<Proposal>,
    proposals_rx: mpsc::UnboundedReceiver<Proposal>,
    events: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl Engine {
    /// Creates an engine and the handle used to talk to it.
    pub fn new(config: EngineConfig, services: EngineServices) -> (Self, EngineHandle) {
        let (objective_tx, objective_rx) = mpsc::channel(config.request_buffer.max(1));
        let (payment_tx, payment_rx) = mpsc::channel(config.request_buffer.max(1));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (proposals_tx, proposals_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let address = services.store.address();

        let handle = EngineHandle {
            address,
            objective_requests: objective_tx,
            payment_requests: payment_tx,
            events: events.clone(),
            cancel: cancel.clone(),
        };
        let engine = Self {
            address,
            secret_key: services.store.channel_secret_key(),
            chain_events: services.chain.event_feed(),
            chain_open: true,
            outbox: Outbox::new(services.messages, config.max_in_flight_sends),
            notifier: Notifier::default(),
            store: services.store,
            chain: services.chain,
            policy: services.policy,
            payments: services.payments,
            inbound: services.inbound,
            objective_requests: objective_rx,
            payment_requests: payment_rx,
            proposals_tx,
            proposals_rx,
            events,
            cancel,
            config,
        };
        (engine, handle)
    }

    /// Runs until shut down or until an error the [`ErrorPolicy`](crate::ErrorPolicy)
    /// escalates, which is returned after in-flight messages are flushed.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(address = %self.address, "engine started");

        let outcome = loop {
            let input = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                Some(command) = self.objective_requests.recv() => Input::Objective(command),
                Some(command) = self.payment_requests.recv() => Input::Payment(command),
                event = self.chain_events.recv(), if self.chain_open => Input::Chain(event),
                Some(message) = self.inbound.recv() => Input::Message(message),
                Some(proposal) = self.proposals_rx.recv() => Input::Proposal(proposal),
            };

            let result = self.handle(input).await;
            if let Err(e) = self.tolerate(result) {
                tracing::error!(address = %self.address, error = %e, "engine stopping on error");
                break Err(e);
            }
        };

        tracing::debug!(in_flight = self.outbox.in_flight(), "draining outbox");
        self.outbox.drain().await;
        tracing::info!(address = %self.address, "engine stopped");
        outcome
    }

    fn tolerate(&self, result: Result<()>) -> Result<()> {
        let Err(e) = result else {
            return Ok(());
        };
        let category = e.category();
        match self.config.error_policy.escalation(category) {
            Escalation::Absorb => {
                tracing::warn!(address = %self.address, ?category, error = %e, "absorbed error");
                Ok(())
            }
            Escalation::Escalate => Err(e),
        }
    }

    async fn handle(&mut self, input: Input) -> Result<()> {
        match input {
            Input::Objective(command) => self.handle_objective_request(command).await,
            Input::Payment(command) => self.handle_payment_request(command).await,
            Input::Chain(Ok(event)) => self.handle_chain_event(event).await,
            Input::Chain(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "chain event feed lagged");
                Ok(())
            }
            Input::Chain(Err(RecvError::Closed)) => {
                tracing::warn!("chain event feed closed");
                self.chain_open = false;
                Ok(())
            }
            Input::Message(message) => self.handle_message(message).await,
            Input::Proposal(proposal) => self.handle_internal_proposal(proposal).await,
        }
    }

    async fn handle_objective_request(&mut self, command: ObjectiveCommand) -> Result<()> {
        let ObjectiveCommand { request, respond } = command;
        let objective = match self
            .construct_from_request(&request)
            .and_then(|o| self.on_accepted(&o).map(|()| o))
        {
            Ok(objective) => objective,
            Err(e) => {
                tracing::warn!(objective = %request.id(self.address), error = %e, "objective request refused");
                let _ = respond.send(Err(e));
                return Ok(());
            }
        };

        let id = objective.id();
        tracing::info!(objective = %id, "created objective");
        let _ = respond.send(Ok(id));
        self.attempt_progress(objective).await
    }

    fn construct_from_request(&self, request: &ObjectiveRequest) -> Result<Objective> {
        let id = request.id(self.address);
        if self.store.get_objective_by_id(&id)?.is_some() {
            return Err(EngineError::ObjectiveExists(id));
        }

        let objective = match request {
            ObjectiveRequest::DirectFund(r) => {
                let existing = self.store.get_consensus_channel(&r.counterparty)?;
                Objective::DirectFund(DirectFundObjective::from_request(r, self.address, |_| {
                    existing.is_some()
                })?)
            }
            ObjectiveRequest::DirectDefund(r) => {
                let ledger = self
                    .store
                    .get_consensus_channel_by_id(&r.channel_id)?
                    .ok_or(EngineError::LedgerNotFound(r.channel_id))?;
                Objective::DirectDefund(DirectDefundObjective::from_request(r, &ledger)?)
            }
            ObjectiveRequest::VirtualFund(r) => {
                let first_hop = r.intermediaries.first().unwrap_or(&r.counterparty);
                let ledger = self.store.get_consensus_channel(first_hop)?;
                Objective::VirtualFund(VirtualFundObjective::from_request(r, self.address, |_| {
                    ledger.clone()
                })?)
            }
            ObjectiveRequest::VirtualDefund(r) => {
                let channel = self
                    .store
                    .get_channel_by_id(&r.channel_id)?
                    .ok_or(EngineError::ChannelNotFound(r.channel_id))?;
                let paid = self.paid_through(&channel.id)?;
                let ledgers = self.neighbour_ledgers(channel.participants(), channel.my_index)?;
                Objective::VirtualDefund(VirtualDefundObjective::from_request(
                    channel,
                    paid,
                    |peer| ledgers.get(peer).cloned(),
                )?)
            }
        };
        Ok(objective)
    }

    fn construct_from_payload(&self, payload: &ObjectivePayload) -> Result<Objective> {
        let state = payload.signed_state.state();
        let objective = match payload.objective_id.kind()? {
            ObjectiveKind::DirectFund => {
                Objective::DirectFund(DirectFundObjective::from_payload(payload, self.address)?)
            }
            ObjectiveKind::DirectDefund => {
                let channel_id = state.channel_id();
                let ledger = self
                    .store
                    .get_consensus_channel_by_id(&channel_id)?
                    .ok_or(EngineError::LedgerNotFound(channel_id))?;
                Objective::DirectDefund(DirectDefundObjective::from_payload(payload, &ledger)?)
            }
            ObjectiveKind::VirtualFund => {
                let my_index = state
                    .participants
                    .iter()
                    .position(|p| *p == self.address)
                    .ok_or(ProtocolError::NotParticipant(self.address))?;
                let ledgers = self.neighbour_ledgers(&state.participants, my_index)?;
                Objective::VirtualFund(VirtualFundObjective::from_payload(
                    payload,
                    self.address,
                    |peer| ledgers.get(peer).cloned(),
                )?)
            }
            ObjectiveKind::VirtualDefund => {
                let channel_id = state.channel_id();
                let channel = self
                    .store
                    .get_channel_by_id(&channel_id)?
                    .ok_or(EngineError::ChannelNotFound(channel_id))?;
                let minimum = self.paid_through(&channel_id)?;
                let ledgers = self.neighbour_ledgers(channel.participants(), channel.my_index)?;
                Objective::VirtualDefund(VirtualDefundObjective::from_payload(
                    payload,
                    channel,
                    minimum,
                    |peer| ledgers.get(peer).cloned(),
                )?)
            }
        };
        Ok(objective)
    }

    /// Bookkeeping for an objective the node has committed to.
    fn on_accepted(&self, objective: &Objective) -> Result<()> {
        match objective {
            Objective::DirectDefund(o) => {
                // The ledger is superseded by the channel the objective now owns.
                self.store.destroy_consensus_channel(&o.channel().id)?;
            }
            Objective::VirtualFund(o) if o.is_payer() || o.is_payee() => {
                self.payments.register(
                    o.channel().id,
                    o.payer(),
                    o.payee(),
                    o.payer_balance(),
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn neighbour_ledgers(
        &self,
        participants: &[Address],
        my_index: usize,
    ) -> Result<HashMap<Address, ConsensusChannel>> {
        let mut ledgers = HashMap::new();
        let neighbours = my_index.checked_sub(1).into_iter().chain(Some(my_index + 1));
        for peer in neighbours.filter_map(|i| participants.get(i)) {
            if let Some(ledger) = self.store.get_consensus_channel(peer)? {
                ledgers.insert(*peer, ledger);
            }
        }
        Ok(ledgers)
    }

    fn paid_through(&self, channel_id: &ChannelId) -> Result<Amount> {
        if self.payments.channel_registered(channel_id) {
            Ok(self.payments.paid(channel_id)?)
        } else {
            Ok(0)
        }
    }

    async fn handle_payment_request(&mut self, command: PaymentCommand) -> Result<()> {
        let PaymentCommand {
            channel_id,
            amount,
            respond,
        } = command;
        match self.issue_voucher(&channel_id, amount) {
            Ok((voucher, payee)) => {
                let message = Message::for_voucher(self.address, payee, voucher.clone());
                self.outbox.dispatch(message).await;
                let _ = respond.send(Ok(voucher));
            }
            Err(e) => {
                tracing::warn!(channel = %channel_id, amount, error = %e, "payment refused");
                let _ = respond.send(Err(e));
            }
        }
        Ok(())
    }

    fn issue_voucher(&mut self, channel_id: &ChannelId, amount: Amount) -> Result<(Voucher, Address)> {
        let channel = self
            .store
            .get_channel_by_id(channel_id)?
            .ok_or(EngineError::ChannelNotFound(*channel_id))?;
        let payee = channel
            .participants()
            .last()
            .copied()
            .ok_or(EngineError::ChannelNotFound(*channel_id))?;
        let voucher = self.payments.pay(channel_id, amount, &self.secret_key)?;
        tracing::debug!(channel = %channel_id, amount, total = voucher.amount, %payee, "paying");

        let mut event = EngineEvent::default();
        self.notifier.payment(
            payment_info(&channel, ChannelStatus::Open, voucher.amount),
            &mut event,
        );
        self.emit(event);
        Ok((voucher, payee))
    }

    async fn handle_chain_event(&mut self, event: ChainEvent) -> Result<()> {
        let channel_id = event.channel_id();
        let Some(mut objective) = self.store.get_objective_by_channel_id(&channel_id)? else {
            tracing::trace!(channel = %channel_id, "ignoring chain event for unowned channel");
            return Ok(());
        };
        tracing::debug!(
            objective = %objective.id(),
            block_num = event.block_num(),
            "applying chain event"
        );
        objective.update_with_chain_event(&event)?;
        self.attempt_progress(objective).await
    }

    async fn handle_message(&mut self, message: Message) -> Result<()> {
        tracing::debug!(
            from = %message.from,
            payloads = message.objective_payloads.len(),
            proposals = message.ledger_proposals.len(),
            payments = message.payments.len(),
            rejections = message.rejected_objectives.len(),
            "received message"
        );
        for payload in message.objective_payloads {
            let result = self.handle_objective_payload(payload).await;
            self.tolerate(result)?;
        }
        for proposal in message.ledger_proposals {
            let result = self.handle_ledger_proposal(proposal).await;
            self.tolerate(result)?;
        }
        for voucher in message.payments {
            let result = self.handle_voucher(voucher);
            self.tolerate(result)?;
        }
        for id in message.rejected_objectives {
            let result = self.handle_rejection(id);
            self.tolerate(result)?;
        }
        Ok(())
    }

    async fn handle_objective_payload(&mut self, payload: ObjectivePayload) -> Result<()> {
        let id = payload.objective_id.clone();
        let objective = match self.store.get_objective_by_id(&id)? {
            Some(mut objective) => {
                if objective.status().is_terminal() {
                    tracing::debug!(objective = %id, "ignoring payload for finished objective");
                    return Ok(());
                }
                objective.update(&payload)?;
                objective
            }
            None => {
                let mut objective = self.construct_from_payload(&payload)?;
                if !self.policy.should_approve(&objective) {
                    return self.reject(objective).await;
                }
                objective.approve();
                self.on_accepted(&objective)?;
                tracing::info!(objective = %id, "approved objective");
                objective
            }
        };
        self.attempt_progress(objective).await
    }

    async fn reject(&mut self, mut objective: Objective) -> Result<()> {
        let id = objective.id();
        let effects = objective.reject();
        self.store.set_objective(&objective)?;
        tracing::info!(objective = %id, "rejected objective");
        self.execute_side_effects(effects).await?;
        self.emit(EngineEvent {
            failed_objectives: vec![id],
            ..EngineEvent::default()
        });
        Ok(())
    }

    async fn handle_ledger_proposal(&mut self, proposal: SignedProposal) -> Result<()> {
        let id = ObjectiveId::for_proposal(&proposal.proposal);
        if let Some(mut objective) = self.store.get_objective_by_id(&id)? {
            if objective.status().is_terminal() {
                tracing::debug!(
                    objective = %id,
                    turn_num = proposal.turn_num,
                    "ignoring proposal for finished objective"
                );
                return Ok(());
            }
            objective.receive_proposal(proposal)?;
            return self.attempt_progress(objective).await;
        }

        // Keep the proposal in the ledger for the objective to find once it exists.
        let ledger_id = proposal.proposal.ledger_id;
        let mut ledger = self
            .store
            .get_consensus_channel_by_id(&ledger_id)?
            .ok_or(EngineError::LedgerNotFound(ledger_id))?;
        ledger.receive(proposal).map_err(ProtocolError::from)?;
        self.store.set_consensus_channel(&ledger)?;
        Err(EngineError::ObjectiveNotFound(id))
    }

    async fn handle_internal_proposal(&mut self, proposal: Proposal) -> Result<()> {
        let id = ObjectiveId::for_proposal(&proposal);
        match self.store.get_objective_by_id(&id)? {
            Some(objective) if objective.status() == ObjectiveStatus::Approved => {
                self.attempt_progress(objective).await
            }
            Some(_) => Ok(()),
            None => Err(EngineError::ObjectiveNotFound(id)),
        }
    }

    fn handle_voucher(&mut self, voucher: Voucher) -> Result<()> {
        let total = self.payments.receive(&voucher)?;
        let mut event = EngineEvent {
            received_vouchers: vec![voucher.clone()],
            ..EngineEvent::default()
        };
        if let Some(channel) = self.store.get_channel_by_id(&voucher.channel_id)? {
            self.notifier.payment(
                payment_info(&channel, ChannelStatus::Open, total),
                &mut event,
            );
        }
        self.emit(event);
        Ok(())
    }

    fn handle_rejection(&mut self, id: ObjectiveId) -> Result<()> {
        let Some(mut objective) = self.store.get_objective_by_id(&id)? else {
            return Err(EngineError::ObjectiveNotFound(id));
        };
        if objective.status().is_terminal() {
            return Ok(());
        }

        // The peer that rejected needs no notice back.
        let _ = objective.reject();
        let channel_id = objective.owned_channel().id;
        self.store.set_objective(&objective)?;
        self.store.release_channel_from_ownership(&channel_id)?;
        if let Objective::VirtualFund(_) = objective {
            self.payments.remove(&channel_id);
        }
        tracing::info!(objective = %id, "objective rejected by peer");
        self.emit(EngineEvent {
            failed_objectives: vec![id],
            ..EngineEvent::default()
        });
        Ok(())
    }

    /// Cranks an objective, persists it, and carries out what the crank asked for.
    async fn attempt_progress(&mut self, mut objective: Objective) -> Result<()> {
        if objective.status() != ObjectiveStatus::Approved {
            self.store.set_objective(&objective)?;
            return Ok(());
        }

        let (effects, waiting_for) = objective.crank(&self.secret_key)?;
        self.store.set_objective(&objective)?;
        tracing::debug!(objective = %objective.id(), %waiting_for, "cranked objective");

        let mut event = EngineEvent::default();
        self.notify_channels(&objective, &mut event)?;
        if waiting_for == WaitingFor::Nothing {
            self.complete(&objective, &mut event)?;
        }

        self.execute_side_effects(effects).await?;
        self.emit(event);
        Ok(())
    }

    fn complete(&mut self, objective: &Objective, event: &mut EngineEvent) -> Result<()> {
        let id = objective.id();
        let channel_id = objective.owned_channel().id;
        self.store.release_channel_from_ownership(&channel_id)?;
        match objective {
            Objective::DirectFund(o) => {
                let ledger = o.create_consensus_channel()?;
                self.store.set_consensus_channel(&ledger)?;
                self.store.destroy_channel(&channel_id)?;
            }
            Objective::VirtualDefund(_) => self.payments.remove(&channel_id),
            Objective::DirectDefund(_) | Objective::VirtualFund(_) => {}
        }
        tracing::info!(objective = %id, "objective completed");
        event.completed_objectives.push(id);
        Ok(())
    }

    fn notify_channels(&mut self, objective: &Objective, event: &mut EngineEvent) -> Result<()> {
        let done = objective.status() == ObjectiveStatus::Completed;
        for ledger in objective.ledgers() {
            self.notifier.ledger(ledger_info_from_consensus(ledger), event);
        }
        match objective {
            Objective::DirectFund(o) => {
                let status = if done {
                    ChannelStatus::Open
                } else {
                    ChannelStatus::Opening
                };
                self.notifier
                    .ledger(ledger_info_from_channel(o.channel(), status), event);
            }
            Objective::DirectDefund(o) => {
                let status = if done {
                    ChannelStatus::Complete
                } else {
                    ChannelStatus::Closing
                };
                self.notifier
                    .ledger(ledger_info_from_channel(o.channel(), status), event);
            }
            Objective::VirtualFund(o) => {
                let status = if done {
                    ChannelStatus::Open
                } else {
                    ChannelStatus::Opening
                };
                let paid = self.paid_through(&o.channel().id)?;
                self.notifier
                    .payment(payment_info(o.channel(), status, paid), event);
            }
            Objective::VirtualDefund(o) => {
                let status = if done {
                    ChannelStatus::Complete
                } else {
                    ChannelStatus::Closing
                };
                self.notifier
                    .payment(payment_info(o.channel(), status, o.paid()), event);
            }
        }
        Ok(())
    }

    async fn execute_side_effects(&mut self, effects: SideEffects) -> Result<()> {
        for message in effects.messages_to_send {
            tracing::trace!(to = %message.to, "queueing message");
            self.outbox.dispatch(message).await;
        }
        for tx in effects.transactions_to_submit {
            tracing::debug!(channel = %tx.channel_id(), "submitting transaction");
            self.chain.send_transaction(tx).await?;
        }
        for proposal in effects.proposals_to_process {
            if self.proposals_tx.send(proposal).is_err() {
                tracing::warn!("proposal queue closed");
            }
        }
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        if !event.is_empty() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::messaging::MessageBroker;
    use crate::payments::VoucherManager;
    use crate::policy::PermissivePolicy;
    use nitro_protocols::{DirectDefundRequest, DirectFundRequest};
    use nitro_store::MemStore;
    use pretty_assertions::assert_eq;

    fn engine() -> (Engine, EngineHandle, Arc<MemStore>) {
        let key = SecretKey::generate();
        let store = Arc::new(MemStore::new(key.clone()));
        let broker = MessageBroker::new(16);
        let (client, inbound) = broker.connect(key.address());
        let (engine, handle) = Engine::new(
            EngineConfig::default(),
            EngineServices {
                store: store.clone(),
                chain: Arc::new(MockChain::default()),
                messages: Arc::new(client),
                inbound,
                policy: Arc::new(PermissivePolicy),
                payments: Arc::new(VoucherManager::new()),
            },
        );
        (engine, handle, store)
    }

    #[tokio::test]
    async fn construction_errors_go_back_to_the_caller() {
        let (engine, handle, _store) = engine();
        let task = tokio::spawn(engine.run());

        let missing = ChannelId::from_bytes([7; 32]);
        let result = handle
            .create_objective(ObjectiveRequest::DirectDefund(DirectDefundRequest {
                channel_id: missing,
                is_challenge: false,
            }))
            .await;
        assert!(matches!(result, Err(EngineError::LedgerNotFound(id)) if id == missing));

        handle.shutdown();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn duplicate_requests_are_refused() {
        let (engine, handle, store) = engine();
        let task = tokio::spawn(engine.run());

        let request = ObjectiveRequest::DirectFund(DirectFundRequest {
            counterparty: Address::from_bytes([2; 20]),
            challenge_duration: 60,
            outcome: nitro_channel::Exit::default(),
            nonce: 1,
            app_definition: Address::ZERO,
        });
        let id = handle.create_objective(request.clone()).await.unwrap();
        let again = handle.create_objective(request).await;
        assert!(matches!(again, Err(EngineError::ObjectiveExists(dup)) if dup == id));
        assert_eq!(store.objective_count(), 1);

        handle.shutdown();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn strict_policy_escalates_unknown_objectives() {
        let key = SecretKey::generate();
        let store = Arc::new(MemStore::new(key.clone()));
        let broker = MessageBroker::new(16);
        let (client, inbound) = broker.connect(key.address());
        let (peer, _peer_inbox) = broker.connect(Address::from_bytes([9; 20]));
        let config = EngineConfig {
            error_policy: crate::ErrorPolicy::strict(),
            ..EngineConfig::default()
        };
        let (engine, _handle) = Engine::new(
            config,
            EngineServices {
                store,
                chain: Arc::new(MockChain::default()),
                messages: Arc::new(client),
                inbound,
                policy: Arc::new(PermissivePolicy),
                payments: Arc::new(VoucherManager::new()),
            },
        );
        let task = tokio::spawn(engine.run());

        let mut message = Message::new(peer.address(), key.address());
        message
            .rejected_objectives
            .push(ObjectiveId::from("DirectFunding-0x01".to_string()));
        peer.send(message).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(EngineError::ObjectiveNotFound(_))));
    }
}
