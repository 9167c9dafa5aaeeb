//! Built-in games: their actions, agents and state handling.

pub mod agarnt;
pub mod checkers;

/// A built-in agent that worker processes can run, selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentKind {
    /// Name used on the command line and in the worker environment.
    pub name: &'static str,
    /// Prefix of the bot names shown to the server.
    pub display_name: &'static str,
    /// Game the agent plays.
    pub game_type: &'static str,
}

/// Every agent a worker process can run.
pub const AGENTS: [AgentKind; 4] = [
    AgentKind {
        name: "random",
        display_name: "RandomAgent",
        game_type: agarnt::GAME_TYPE,
    },
    AgentKind {
        name: "close_food",
        display_name: "CloseFoodAgent",
        game_type: agarnt::GAME_TYPE,
    },
    AgentKind {
        name: "grad",
        display_name: "GradAgent",
        game_type: agarnt::GAME_TYPE,
    },
    AgentKind {
        name: "checkers_random",
        display_name: "RandomBot",
        game_type: checkers::GAME_TYPE,
    },
];

/// The built-in agent called `name`.
pub fn agent_kind(name: &str) -> Option<AgentKind> {
    AGENTS.into_iter().find(|kind| kind.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_agents_by_name() {
        assert_eq!(agent_kind("close_food").unwrap().display_name, "CloseFoodAgent");
        assert_eq!(agent_kind("checkers_random").unwrap().game_type, "checkers");
        assert_eq!(agent_kind("grad").unwrap().game_type, "agarnt");
        assert!(agent_kind("minimax").is_none());
    }
}
