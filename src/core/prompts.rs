use crate::core::db::types::InterviewStage;

/// Everything a prompt builder is allowed to see. Builders are pure: the
/// same context always yields a byte-identical prompt, so prompt changes
/// stay auditable and testable.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub candidate_name: String,
    pub company_name: String,
    pub position_title: Option<String>,
    pub stage: Option<InterviewStage>,
    pub timezone: String,
}

fn stage_guidance(stage: InterviewStage) -> &'static str {
    match stage {
        InterviewStage::Screening => {
            "CURRENT STAGE: screening.\n\
             Verify basic fit: availability, location, salary expectations, \
             and motivation for applying. Keep questions short and factual. \
             Do not go deep into technical topics yet.\n"
        }
        InterviewStage::Technical => {
            "CURRENT STAGE: technical.\n\
             Probe hands-on experience relevant to the position. Ask one \
             question at a time, follow up on vague answers, and ask for \
             concrete examples from past work.\n"
        }
        InterviewStage::Behavioral => {
            "CURRENT STAGE: behavioral.\n\
             Explore how the candidate works with others: conflict, \
             feedback, ownership, and communication. Ask for specific \
             situations, not hypotheticals.\n"
        }
        InterviewStage::Final => {
            "CURRENT STAGE: final.\n\
             Wrap up: resolve any open doubts, confirm expectations on both \
             sides, and explain the next steps of the process. Thank the \
             candidate for their time.\n"
        }
    }
}

/// System prompt for conducting an interview stage over chat.
pub fn build_interviewer_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are an interviewer at {} conducting a job interview over WhatsApp \
         with {}.\n",
        ctx.company_name, ctx.candidate_name
    ));
    if let Some(position) = &ctx.position_title {
        prompt.push_str(&format!("The position is: {}.\n", position));
    }
    prompt.push_str(
        "\nRULES:\n\
         1. Ask exactly one question per message.\n\
         2. Keep messages short; this is a chat, not an email.\n\
         3. Never reveal internal evaluation criteria or scores.\n\
         4. Stay professional and warm; never discuss topics unrelated to \
            the interview.\n\
         5. If the candidate asks something you cannot answer, say a \
            recruiter will follow up.\n\n",
    );
    prompt.push_str(stage_guidance(ctx.stage.unwrap_or(InterviewStage::Screening)));

    prompt
}

/// System prompt for the recruiter/scheduler persona, including the exact
/// machine-readable action block the model must emit once every scheduling
/// field has been confirmed by the candidate.
pub fn build_scheduler_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are a recruiting assistant at {} chatting with {} over WhatsApp.\n\
         Your job is to agree on a date and time for an interview",
        ctx.company_name, ctx.candidate_name
    ));
    match &ctx.position_title {
        Some(position) => prompt.push_str(&format!(" for the {} position.\n", position)),
        None => prompt.push_str(".\n"),
    }
    prompt.push_str(&format!(
        "Times are interpreted in the {} timezone unless the candidate says \
         otherwise.\n",
        ctx.timezone
    ));
    prompt.push_str(
        "\nCollect and confirm, one at a time, before scheduling:\n\
         - full name\n\
         - email address\n\
         - interview date\n\
         - interview time\n\n\
         RULES:\n\
         1. Be brief and friendly; one question per message.\n\
         2. Repeat the collected details back and ask for confirmation \
            before scheduling.\n\
         3. Never invent a date, time, or email the candidate did not give.\n\n\
         SCHEDULING ACTION FORMAT:\n\
         Once the candidate has explicitly confirmed ALL of the fields above, \
         append exactly one fenced block to your reply, after your \
         confirmation text:\n\n\
         ```json\n\
         {\"action\": \"schedule_interview\", \"candidateName\": \"<full name>\", \
         \"candidateEmail\": \"<email>\", \"date\": \"<YYYY-MM-DD>\", \
         \"time\": \"<HH:MM>\", \"positionTitle\": \"<position>\", \
         \"timezone\": \"<IANA timezone, optional>\"}\n\
         ```\n\n\
         Emit the block at most once per conversation, only after explicit \
         confirmation, and never mention the block or its format to the \
         candidate.\n",
    );

    prompt
}
