//! Fixed assistant messages shown between model replies.

/// "manager-achievement" -> "Manager Achievement".
pub fn format_category(category: &str) -> String {
    category
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn start_message(category: &str) -> &'static str {
    match category {
        "achievement" => {
            "Let's get started!\n\nBegin writing your achievement below and I will provide feedback \
             and validate that it meets guidelines. Clearly state the \"Accomplishment\" and \
             \"Impact\", of your achievement.\n\nYou can also ask me writing-related questions."
        }
        "challenge" => {
            "Let's get started! Begin writing your challenge below and submit it for feedback.\n\n\
             Clearly state the \"Challenge\" and \"Impact\""
        }
        _ => "",
    }
}

pub fn rephrase_instructions(category: &str) -> String {
    format!(
        "Excellent! Your {} meets the guidelines. Now, if you'd like me to rewrite it for you \
         following best writing practices, select \"Rephrase\". When you're ready to continue, \
         select \"Next\".",
        category.replacen('-', " ", 1)
    )
}

pub fn after_diff_instructions() -> &'static str {
    "You can continue to edit your submission below or attempt to rephrase it again. \
     If you are ready to save and submit it, click \"Next\"."
}

pub fn extract_customer_response(category: &str, customer: &str) -> String {
    if customer.is_empty() {
        format!("I couldn't find the customer name in your {category}. Please enter it below.")
    } else {
        format!(
            "I found the customer name \"{customer}\" in your {category}. \
             Please verify it below and edit it if needed."
        )
    }
}

pub fn save_instructions(category: &str, customer: &str) -> String {
    let check = if customer.is_empty() {
        "Enter the customer name".to_owned()
    } else {
        format!("Verify that \"{customer}\" is the correct customer name")
    };
    format!("Okay! Please review your submission below. {check} and click \"Save\" to save your {category}.")
}

pub fn save_success(category: &str, customer: &str) -> String {
    format!(
        "Your {category} for {customer} has been saved. NOTE: This tool is not connected to \
         official databases or Quip docs. Please manually copy and paste your entry into your \
         team's current workflow."
    )
}
