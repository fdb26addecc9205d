//! Prompt construction for posts and review replies.

use crate::llm::{ContentPurpose, PromptContext, ReplyTone};

/// Prefix of the trailing address line every post ends with.
pub const ADDRESS_PREFIX: &str = "📍 Address: ";

/// System and user messages for one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

/// Build the chat messages for a prompt context.
pub fn build_messages(context: &PromptContext) -> ChatPrompt {
    match &context.purpose {
        ContentPurpose::Post => post_prompt(context),
        ContentPurpose::ReviewReply {
            reviewer_name,
            rating,
            comment,
            tone,
        } => reply_prompt(context, reviewer_name, *rating, comment.as_deref(), *tone),
    }
}

fn post_prompt(context: &PromptContext) -> ChatPrompt {
    let system = "You write Google Business Profile posts for local businesses. \
                  Posts are friendly, specific, under 120 words, use at most two emojis, \
                  and never invent prices, discounts or opening hours."
        .to_string();

    let mut user = format!(
        "Write a post for \"{}\", a {} business.",
        context.business_name,
        display_category(&context.category)
    );
    if !context.keywords.is_empty() {
        user.push_str(&format!(
            "\nWork these keywords in naturally: {}.",
            context.keywords.join(", ")
        ));
    }
    if let Some(location) = &context.location {
        user.push_str(&format!(
            "\nEnd the post with this exact line on its own:\n{}{}",
            ADDRESS_PREFIX, location
        ));
    }
    user.push_str("\nReturn only the post text.");

    ChatPrompt { system, user }
}

fn reply_prompt(
    context: &PromptContext,
    reviewer_name: &str,
    rating: u8,
    comment: Option<&str>,
    tone: ReplyTone,
) -> ChatPrompt {
    let system = format!(
        "You reply to Google reviews on behalf of \"{}\". Replies are short (2-4 sentences), \
         personal, and never defensive. Do not mention being an AI.",
        context.business_name
    );

    let guidance = match tone {
        ReplyTone::Positive => "Thank the reviewer warmly and invite them back.",
        ReplyTone::Neutral => {
            "Thank the reviewer, acknowledge their points and say how the visit could be better next time."
        }
        ReplyTone::Negative => {
            "Apologise sincerely, acknowledge the specific problem and offer to make it right offline."
        }
    };

    let name = if reviewer_name.trim().is_empty() {
        "a customer"
    } else {
        reviewer_name
    };

    let mut user = format!(
        "Reply to a {}-star review from {} for our {} business.",
        rating,
        name,
        display_category(&context.category)
    );
    match comment.map(str::trim).filter(|c| !c.is_empty()) {
        Some(comment) => user.push_str(&format!("\nReview: \"{}\"", comment)),
        None => user.push_str("\nThe reviewer left a rating without a comment."),
    }
    if !context.keywords.is_empty() {
        user.push_str(&format!(
            "\nIf it fits, mention one of: {}.",
            context.keywords.join(", ")
        ));
    }
    user.push('\n');
    user.push_str(guidance);
    user.push_str("\nReturn only the reply text.");

    ChatPrompt { system, user }
}

fn display_category(category: &str) -> &str {
    let trimmed = category.trim();
    if trimmed.is_empty() { "local" } else { trimmed }
}
