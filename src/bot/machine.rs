//! Conversation state machine: five states, one handler each. A handler
//! inspects the incoming message and the persisted user record, performs at
//! most one directory/gateway side effect, and returns the reply text plus
//! the next state. The driver owns sending and the state map.

use crate::bot::directory::UserDirectory;
use crate::bot::gateway::DomainGateway;
use crate::bot::storage::StoreError;

pub(crate) const MSG_USE_START: &str = "Use /start to begin.";
pub(crate) const MSG_WELCOME: &str =
    "Welcome to the goalbot! Your verification code is on its way.";
pub(crate) const MSG_ALREADY_REGISTERED: &str = "Already registered. Use /check_verification.";
pub(crate) const MSG_VERIFIED_HINT: &str =
    "You are verified. Use /goals to list your goals or /create to add one.";
pub(crate) const MSG_VERIFICATION_DONE: &str =
    "Verification complete. Use /goals to list your goals or /create to add one.";
pub(crate) const MSG_NOT_VERIFIED: &str = "You are not verified. Use /check_verification.";
pub(crate) const MSG_VERIFY_FIRST: &str =
    "You need to be verified before creating goals. Use /check_verification.";
pub(crate) const MSG_NO_GOALS: &str = "You have no goals yet.";
pub(crate) const MSG_NO_CATEGORIES: &str = "You have no categories yet.";
pub(crate) const MSG_UNKNOWN: &str = "Unknown command";
pub(crate) const MSG_CANCELLED: &str = "Cancelled. Use /goals or /create.";
pub(crate) const MSG_NO_SELECTION: &str = "Pick a category with /create first.";

/// Where one conversation currently is. Transient and in-memory: a process
/// restart puts every conversation back at `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationState {
    Start,
    AwaitingVerification,
    Idle,
    AwaitingCategory,
    AwaitingGoalTitle,
}

/// One dispatchable inbound message, reduced to what the handlers consume.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub chat_id: i64,
    pub sender_id: i64,
    pub text: &'a str,
}

/// What a dispatch produced: replies to send, in order, and the state the
/// conversation moves to.
#[derive(Debug)]
pub struct Outcome {
    pub replies: Vec<String>,
    pub next: ConversationState,
}

/// A single handler's result. `redispatch` feeds the same message to the
/// next state's handler within the same dispatch.
struct Step {
    reply: Option<String>,
    next: ConversationState,
    redispatch: bool,
}

impl Step {
    fn to(next: ConversationState, reply: impl Into<String>) -> Self {
        Self { reply: Some(reply.into()), next, redispatch: false }
    }

    fn silent(next: ConversationState) -> Self {
        Self { reply: None, next, redispatch: false }
    }

    /// Forced reset: no record exists for this sender, so /start was never
    /// issued. A defined transition, not an error.
    fn reset() -> Self {
        Self::to(ConversationState::Start, MSG_USE_START)
    }
}

pub struct StateMachine {
    directory: UserDirectory,
    gateway: DomainGateway,
    site_url: String,
}

impl StateMachine {
    pub fn new(directory: UserDirectory, gateway: DomainGateway, site_url: String) -> Self {
        let site_url = site_url.trim_end_matches('/').to_string();
        Self { directory, gateway, site_url }
    }

    /// Run the message through the handler for `state`, following at most
    /// one re-dispatch. Store failures abort the whole dispatch; the caller
    /// logs them and leaves the conversation state untouched.
    pub fn dispatch(
        &self,
        state: ConversationState,
        msg: &Inbound<'_>,
    ) -> Result<Outcome, StoreError> {
        let mut replies = Vec::new();
        let mut current = state;

        loop {
            let step = match current {
                ConversationState::Start => self.on_start(msg)?,
                ConversationState::AwaitingVerification => self.on_awaiting_verification(msg)?,
                ConversationState::Idle => self.on_idle(msg)?,
                ConversationState::AwaitingCategory => self.on_awaiting_category(msg)?,
                ConversationState::AwaitingGoalTitle => self.on_awaiting_goal_title(msg)?,
            };

            if let Some(reply) = step.reply {
                replies.push(reply);
            }
            current = step.next;

            if !step.redispatch {
                break;
            }
        }

        Ok(Outcome { replies, next: current })
    }

    fn on_start(&self, msg: &Inbound<'_>) -> Result<Step, StoreError> {
        if msg.text != "/start" {
            return Ok(Step::to(ConversationState::Start, MSG_USE_START));
        }

        let (user, created) = self.directory.get_or_create(msg.chat_id, msg.sender_id)?;
        if created {
            // The fresh record has no code yet; re-dispatching the same
            // update to the verification handler sends the first code within
            // this driver iteration.
            Ok(Step {
                reply: Some(MSG_WELCOME.to_string()),
                next: ConversationState::AwaitingVerification,
                redispatch: true,
            })
        } else if user.is_verified() {
            Ok(Step::to(ConversationState::Idle, MSG_VERIFIED_HINT))
        } else {
            Ok(Step::to(ConversationState::AwaitingVerification, MSG_ALREADY_REGISTERED))
        }
    }

    fn on_awaiting_verification(&self, msg: &Inbound<'_>) -> Result<Step, StoreError> {
        let Some(user) = self.directory.find(msg.sender_id)? else {
            return Ok(Step::reset());
        };

        if msg.text == "/check_verification" {
            if user.is_verified() {
                Ok(Step::to(ConversationState::Idle, MSG_VERIFICATION_DONE))
            } else {
                let code = self.directory.issue_verification_code(&user)?;
                Ok(Step::to(
                    ConversationState::AwaitingVerification,
                    format!(
                        "Not verified yet. Your code: {code}\nSubmit it in your profile on the web app."
                    ),
                ))
            }
        } else if !user.is_verified() {
            let code = self.directory.issue_verification_code(&user)?;
            Ok(Step::to(
                ConversationState::AwaitingVerification,
                format!("Your verification code: {code}"),
            ))
        } else {
            // Already verified: anything except /check_verification is
            // ignored without a reply.
            Ok(Step::silent(ConversationState::AwaitingVerification))
        }
    }

    fn on_idle(&self, msg: &Inbound<'_>) -> Result<Step, StoreError> {
        let Some(user) = self.directory.find(msg.sender_id)? else {
            return Ok(Step::reset());
        };
        let Some(account_id) = user.verified_account() else {
            return Ok(Step::to(ConversationState::AwaitingVerification, MSG_NOT_VERIFIED));
        };

        match msg.text {
            "/goals" => {
                let goals = self.gateway.visible_goals(account_id)?;
                let reply = if goals.is_empty() {
                    MSG_NO_GOALS.to_string()
                } else {
                    format!("Your goals:\n{}", goals.join("\n"))
                };
                Ok(Step::to(ConversationState::Idle, reply))
            }
            "/create" => {
                let categories = self.gateway.writable_categories(account_id)?;
                if categories.is_empty() {
                    Ok(Step::to(ConversationState::Idle, MSG_NO_CATEGORIES))
                } else {
                    Ok(Step::to(
                        ConversationState::AwaitingCategory,
                        format!("Choose a category for the new goal:\n{}", categories.join("\n")),
                    ))
                }
            }
            _ => Ok(Step::to(ConversationState::Idle, MSG_UNKNOWN)),
        }
    }

    fn on_awaiting_category(&self, msg: &Inbound<'_>) -> Result<Step, StoreError> {
        let Some(user) = self.directory.find(msg.sender_id)? else {
            return Ok(Step::reset());
        };
        if user.verified_account().is_none() {
            return Ok(Step::to(ConversationState::AwaitingVerification, MSG_VERIFY_FIRST));
        }

        if msg.text == "/cancel" {
            return Ok(Step::to(ConversationState::Idle, MSG_CANCELLED));
        }

        // Matched against a fresh fetch, not the list shown earlier; if the
        // categories changed mid-flow, last write wins.
        if self.gateway.select_category(&user, msg.text)?.is_some() {
            return Ok(Step::to(
                ConversationState::AwaitingGoalTitle,
                format!("Enter a title for the new goal in {}", msg.text),
            ));
        }

        Ok(Step::to(ConversationState::AwaitingCategory, MSG_UNKNOWN))
    }

    fn on_awaiting_goal_title(&self, msg: &Inbound<'_>) -> Result<Step, StoreError> {
        let Some(user) = self.directory.find(msg.sender_id)? else {
            return Ok(Step::reset());
        };
        let Some(account_id) = user.verified_account() else {
            return Ok(Step::to(ConversationState::AwaitingVerification, MSG_VERIFY_FIRST));
        };
        let Some(category_id) = user.selected_category else {
            return Ok(Step::to(ConversationState::Idle, MSG_NO_SELECTION));
        };

        if msg.text == "/cancel" {
            return Ok(Step::to(ConversationState::Idle, MSG_CANCELLED));
        }

        let created = self.gateway.create_goal(account_id, category_id, msg.text)?;
        Ok(Step::to(
            ConversationState::Idle,
            format!(
                "Your goal has been created\n{}/boards/{}/categories/{}/goals?goal={}",
                self.site_url, created.board_id, created.category_id, created.goal_id
            ),
        ))
    }
}
