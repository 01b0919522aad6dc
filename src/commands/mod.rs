// src/commands/mod.rs

//! Every user action the front end can trigger, as one closed set.

use crate::error::Result;
use crate::session::SwitchOutcome;
use crate::state::ChatClient;
use crate::streaming::StreamOutcome;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Send(String),
    /// Text of a clicked `#/user_send` link.
    SendLink(String),
    Stop,
    Regenerate(String),
    /// Regenerate the reply that follows a user message.
    RegenerateReply(String),
    Fork(String),
    DeleteMessage(String),
    ToggleCollapse(String),
    ToggleRaw {
        id: String,
        edited: Option<String>,
    },
    EditMessage {
        id: String,
        text: String,
    },
    Switch(String),
    NewSession,
    Rename {
        id: String,
        title: String,
    },
    TogglePin(String),
    DeleteSession(String),
    SelectModel(String),
    AttachImage {
        bytes: Vec<u8>,
        file_name: String,
    },
    RemoveImage {
        message_id: Option<String>,
        image_id: String,
    },
}

#[derive(Debug)]
pub enum CommandOutcome {
    Stream(StreamOutcome),
    Switch(SwitchOutcome),
    /// Id of a newly created session, if one was created.
    Session(Option<String>),
    /// New state of a toggle, `None` when refused.
    Toggled(Option<bool>),
    Title(Option<String>),
    /// Whether the command changed anything.
    Applied(bool),
}

impl ChatClient {
    pub async fn dispatch(&self, command: Command) -> Result<CommandOutcome> {
        tracing::debug!("[command] {:?}", CommandName(&command));
        Ok(match command {
            Command::Send(text) | Command::SendLink(text) => {
                CommandOutcome::Stream(self.send_message(&text).await?)
            }
            Command::Stop => CommandOutcome::Applied(self.stop_generation()),
            Command::Regenerate(id) => CommandOutcome::Stream(self.regenerate_message(&id).await?),
            Command::RegenerateReply(id) => {
                CommandOutcome::Stream(self.regenerate_following_user_message(&id).await?)
            }
            Command::Fork(id) => CommandOutcome::Session(self.fork_session(&id).await?),
            Command::DeleteMessage(id) => CommandOutcome::Applied(self.delete_message(&id)?),
            Command::ToggleCollapse(id) => CommandOutcome::Toggled(self.toggle_collapse(&id)?),
            Command::ToggleRaw { id, edited } => {
                CommandOutcome::Toggled(self.toggle_raw(&id, edited.as_deref()).await?)
            }
            Command::EditMessage { id, text } => {
                CommandOutcome::Applied(self.edit_message_text(&id, &text)?)
            }
            Command::Switch(id) => CommandOutcome::Switch(self.switch_session(&id).await?),
            Command::NewSession => CommandOutcome::Session(self.create_session().await?),
            Command::Rename { id, title } => {
                CommandOutcome::Title(self.rename_session(&id, &title).await?)
            }
            Command::TogglePin(id) => CommandOutcome::Toggled(self.toggle_pin(&id).await?),
            Command::DeleteSession(id) => CommandOutcome::Applied(self.delete_session(&id).await?),
            Command::SelectModel(model) => {
                self.set_model(&model)?;
                CommandOutcome::Applied(true)
            }
            Command::AttachImage { bytes, file_name } => {
                CommandOutcome::Applied(self.attach_image(&bytes, &file_name)?)
            }
            Command::RemoveImage {
                message_id: Some(message_id),
                image_id,
            } => CommandOutcome::Applied(self.remove_message_image(&message_id, &image_id)?),
            Command::RemoveImage {
                message_id: None,
                image_id,
            } => CommandOutcome::Applied(self.remove_pending_image(&image_id)),
        })
    }
}

/// Log-friendly view of a command that leaves out image bytes and message text.
struct CommandName<'a>(&'a Command);

impl std::fmt::Debug for CommandName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            Command::Send(_) => "Send",
            Command::SendLink(_) => "SendLink",
            Command::Stop => "Stop",
            Command::Regenerate(_) => "Regenerate",
            Command::RegenerateReply(_) => "RegenerateReply",
            Command::Fork(_) => "Fork",
            Command::DeleteMessage(_) => "DeleteMessage",
            Command::ToggleCollapse(_) => "ToggleCollapse",
            Command::ToggleRaw { .. } => "ToggleRaw",
            Command::EditMessage { .. } => "EditMessage",
            Command::Switch(_) => "Switch",
            Command::NewSession => "NewSession",
            Command::Rename { .. } => "Rename",
            Command::TogglePin(_) => "TogglePin",
            Command::DeleteSession(_) => "DeleteSession",
            Command::SelectModel(_) => "SelectModel",
            Command::AttachImage { .. } => "AttachImage",
            Command::RemoveImage { .. } => "RemoveImage",
        };
        f.write_str(name)
    }
}
