#[cfg(test)]
#[path = "slash_commands_test.rs"]
mod tests;

pub struct SlashCommand {
    command: String,
    pub args: Vec<String>,
}

impl SlashCommand {
    pub fn parse(text: &str) -> Option<SlashCommand> {
        let mut args = text
            .split_whitespace()
            .map(|e| return e.to_string())
            .collect::<Vec<String>>();
        if args.is_empty() {
            return None;
        }
        let prefix = args[0].to_string();
        args.remove(0);

        let cmd = SlashCommand {
            command: prefix,
            args,
        };
        if cmd.is_quit()
            || cmd.is_model_list()
            || cmd.is_model_set()
            || cmd.is_delete()
            || cmd.is_fork()
            || cmd.is_finalize()
            || cmd.is_clear()
            || cmd.is_cost()
            || cmd.is_help()
        {
            return Some(cmd);
        }

        return None;
    }

    pub fn is_quit(&self) -> bool {
        return ["/q", "/quit", "/exit"].contains(&self.command.as_str());
    }

    pub fn is_model_list(&self) -> bool {
        return ["/ml", "/modellist", "/modelist"].contains(&self.command.as_str());
    }

    pub fn is_model_set(&self) -> bool {
        return ["/m", "/model"].contains(&self.command.as_str());
    }

    pub fn is_delete(&self) -> bool {
        return ["/d", "/delete"].contains(&self.command.as_str());
    }

    pub fn is_fork(&self) -> bool {
        return self.command == "/fork";
    }

    pub fn is_finalize(&self) -> bool {
        return self.command == "/finalize";
    }

    pub fn is_clear(&self) -> bool {
        return self.command == "/clear";
    }

    pub fn is_cost(&self) -> bool {
        return self.command == "/cost";
    }

    pub fn is_help(&self) -> bool {
        return ["/h", "/help"].contains(&self.command.as_str());
    }
}
